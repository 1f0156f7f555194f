//! SMB location parsing, mount-point allocation and mount options.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use vitrine_common::{Error, Result};

use crate::config::SmbConfig;

/// Server, share and optional folder parsed from a UNC path or smb:// URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbLocation {
    pub server: String,
    pub share: String,
    pub subpath: String,
}

/// Parse `smb://server/share/sub`, `\\server\share\sub` or `//server/share`.
pub fn parse_smb_location(raw: &str) -> Result<SmbLocation> {
    let mut cleaned = raw.trim();
    if cleaned.is_empty() {
        return Err(Error::config("SMB path cannot be empty"));
    }
    if cleaned
        .get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("smb://"))
        .unwrap_or(false)
    {
        cleaned = &cleaned[6..];
    }
    let cleaned = cleaned.replace('\\', "/");
    let parts: Vec<&str> = cleaned.split('/').filter(|p| !p.is_empty()).collect();

    if parts.len() < 2 {
        return Err(Error::config(format!(
            "SMB path '{raw}' must contain a server and a share"
        )));
    }

    Ok(SmbLocation {
        server: parts[0].to_string(),
        share: parts[1].to_string(),
        subpath: parts[2..].join("/"),
    })
}

/// Normalize a folder inside a share: forward slashes, no leading or
/// trailing separators, no empty or `.` segments.
pub fn normalize_subpath(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// The `//server/share` form the mount helper expects.
pub fn unc_path(smb: &SmbConfig) -> String {
    format!("//{}/{}", smb.server.trim_matches(['/', '\\']), smb.share.trim_matches(['/', '\\']))
}

/// Turn a source name into a directory name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "smb-source".to_string()
    } else {
        slug
    }
}

/// Pick `<root>/<slug>`, then `<slug>-2`, `<slug>-3`, ... until the path is
/// neither taken by another source nor present on disk.
pub fn allocate_mount_point(root: &Path, name: &str, taken: &HashSet<PathBuf>) -> PathBuf {
    let base = slugify(name);
    let mut candidate = root.join(&base);
    let mut counter = 2;
    while taken.contains(&candidate) || candidate.exists() {
        candidate = root.join(format!("{base}-{counter}"));
        counter += 1;
    }
    candidate
}

/// Build the comma-separated option string passed to the mount helper.
pub fn mount_options(smb: &SmbConfig, password: Option<&str>, uid: u32, gid: u32) -> String {
    let mut options = Vec::new();

    if let Some(domain) = smb.domain.as_deref().filter(|d| !d.is_empty()) {
        options.push(format!("domain={domain}"));
    }
    match (smb.username.as_deref().filter(|u| !u.is_empty()), password) {
        (Some(user), pw) => {
            options.push(format!("username={user}"));
            options.push(format!("password={}", pw.unwrap_or("")));
        }
        (None, Some(pw)) if !pw.is_empty() => options.push(format!("password={pw}")),
        _ => options.push("guest".to_string()),
    }

    options.push("rw".to_string());
    options.push(format!("uid={uid}"));
    options.push(format!("gid={gid}"));
    options.push("file_mode=0775".to_string());
    options.push("dir_mode=0775".to_string());

    let version = smb.version.trim();
    if version.starts_with("vers=") {
        options.push(version.to_string());
    } else if !version.is_empty() {
        options.push(format!("vers={version}"));
    }

    options.extend(
        smb.extra_options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string),
    );

    options.join(",")
}

/// Reduce a user-supplied split-screen folder to a path relative to the
/// source's scan root.
///
/// Accepts the forms people paste: `smb://server/share/sub/folder`,
/// `\\server\share\folder`, or a folder that repeats the source's subpath.
pub fn normalize_side_folder(raw: &str, smb: Option<&SmbConfig>) -> String {
    let mut cleaned = raw.trim();
    if cleaned
        .get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("smb://"))
        .unwrap_or(false)
    {
        cleaned = &cleaned[6..];
    }
    let normalized = normalize_subpath(cleaned);
    let mut parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();

    if let Some(smb) = smb {
        let server = smb.server.trim_matches(['/', '\\']);
        let share = smb.share.trim_matches(['/', '\\']);
        if parts.len() >= 2
            && parts[0].eq_ignore_ascii_case(server)
            && parts[1].eq_ignore_ascii_case(share)
        {
            parts.drain(..2);
        }

        let configured = normalize_subpath(&smb.subpath);
        let conf_parts: Vec<&str> = configured.split('/').filter(|p| !p.is_empty()).collect();
        if !conf_parts.is_empty()
            && parts.len() >= conf_parts.len()
            && parts
                .iter()
                .zip(conf_parts.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
        {
            parts.drain(..conf_parts.len());
        }
    }

    parts.join("/")
}

/// Unescape the octal sequences used in `/proc/self/mounts`.
fn unescape_mount_path(value: &str) -> String {
    value
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Whether `target` appears as a mount point in a mounts table.
pub fn mount_table_contains(table: &str, target: &Path) -> bool {
    table.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(|mounted| Path::new(&unescape_mount_path(mounted)) == target)
            .unwrap_or(false)
    })
}

/// Check `/proc/self/mounts` for an active mount at `target`.
pub fn is_mount_active(target: &Path) -> bool {
    let target = target.canonicalize().unwrap_or_else(|_| target.to_path_buf());
    match std::fs::read_to_string("/proc/self/mounts") {
        Ok(table) => mount_table_contains(&table, &target),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smb(server: &str, share: &str, subpath: &str) -> SmbConfig {
        SmbConfig {
            server: server.into(),
            share: share.into(),
            subpath: subpath.into(),
            version: "3.1.1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_smb_location_forms() {
        let loc = parse_smb_location("smb://nas/photos/lobby/2024").unwrap();
        assert_eq!(loc.server, "nas");
        assert_eq!(loc.share, "photos");
        assert_eq!(loc.subpath, "lobby/2024");

        let loc = parse_smb_location(r"\\nas\photos\lobby").unwrap();
        assert_eq!(loc.share, "photos");
        assert_eq!(loc.subpath, "lobby");

        let loc = parse_smb_location("SMB://nas/photos/").unwrap();
        assert_eq!(loc.subpath, "");

        assert!(parse_smb_location("nas").is_err());
        assert!(parse_smb_location("  ").is_err());
    }

    #[test]
    fn test_normalize_subpath() {
        assert_eq!(normalize_subpath(r"\lobby\2024\"), "lobby/2024");
        assert_eq!(normalize_subpath("/a//b/./c/"), "a/b/c");
        assert_eq!(normalize_subpath(""), "");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Office NAS"), "Office-NAS");
        assert_eq!(slugify("  ümlaut/share  "), "mlaut-share");
        assert_eq!(slugify("***"), "smb-source");
        assert_eq!(slugify("media_01"), "media_01");
    }

    #[test]
    fn test_allocate_mount_point_suffixes() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        let mut taken = HashSet::new();

        let first = allocate_mount_point(root, "nas", &taken);
        assert_eq!(first, root.join("nas"));
        taken.insert(first);

        let second = allocate_mount_point(root, "nas", &taken);
        assert_eq!(second, root.join("nas-2"));

        std::fs::create_dir_all(root.join("nas-2")).unwrap();
        let third = allocate_mount_point(root, "nas", &taken);
        assert_eq!(third, root.join("nas-3"));
    }

    #[test]
    fn test_mount_options_guest() {
        let options = mount_options(&smb("nas", "photos", ""), None, 1000, 1000);
        assert_eq!(
            options,
            "guest,rw,uid=1000,gid=1000,file_mode=0775,dir_mode=0775,vers=3.1.1"
        );
    }

    #[test]
    fn test_mount_options_credentials() {
        let mut config = smb("nas", "photos", "");
        config.username = Some("frame".into());
        config.domain = Some("OFFICE".into());
        config.extra_options = vec!["noserverino".into(), " ".into()];

        let options = mount_options(&config, Some("s3cret"), 0, 0);
        assert_eq!(
            options,
            "domain=OFFICE,username=frame,password=s3cret,rw,uid=0,gid=0,file_mode=0775,dir_mode=0775,vers=3.1.1,noserverino"
        );
    }

    #[test]
    fn test_mount_options_keep_configured_version() {
        let mut config = smb("nas", "photos", "");
        config.version = "3.0".into();
        assert!(mount_options(&config, None, 0, 0).ends_with(",vers=3.0"));

        config.version = "vers=2.1".into();
        assert!(mount_options(&config, None, 0, 0).ends_with(",vers=2.1"));

        config.version = " ".into();
        assert!(!mount_options(&config, None, 0, 0).contains("vers="));
    }

    #[test]
    fn test_unc_path() {
        assert_eq!(unc_path(&smb("nas", "/photos/", "")), "//nas/photos");
    }

    #[test]
    fn test_normalize_side_folder() {
        let config = smb("nas", "photos", "lobby");
        assert_eq!(
            normalize_side_folder("smb://nas/photos/lobby/left", Some(&config)),
            "left"
        );
        assert_eq!(
            normalize_side_folder(r"\\NAS\Photos\Lobby\left\wall", Some(&config)),
            "left/wall"
        );
        assert_eq!(normalize_side_folder("left/", Some(&config)), "left");
        assert_eq!(normalize_side_folder("lobby", Some(&config)), "");
        assert_eq!(normalize_side_folder("/holiday/", None), "holiday");
    }

    #[test]
    fn test_mount_table_contains() {
        let table = "proc /proc proc rw 0 0\n//nas/photos /var/lib/vitrine/mounts/office\\040nas cifs rw 0 0\n";
        assert!(mount_table_contains(
            table,
            Path::new("/var/lib/vitrine/mounts/office nas")
        ));
        assert!(!mount_table_contains(
            table,
            Path::new("/var/lib/vitrine/mounts/nas")
        ));
    }
}
