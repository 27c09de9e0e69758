//! Directory-listing parsing (spec §4.4 getattr/readdir/readlink collaborator).
//!
//! Parses the common Unix `LIST`-style line:
//! `-rw-r--r--  1 owner group  1234 Mon DD [HH:MM|YYYY] name[ -> target]`.
//! Deliberately not a full multi-format (MS-DOS/EPLF/Unix) parser -- spec.md
//! treats listing parsing as an external collaborator and this engine only
//! needs enough of it to drive getattr/readdir/readlink against a real
//! server.

/// One parsed directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mode: u32,
    /// Present only for symlink entries (`name -> target` form).
    pub link_target: Option<String>,
}

/// Parses every line of a `LIST -a` response into [`Entry`] values, skipping
/// lines that don't look like a Unix listing row (blank lines, `total NNN`
/// headers) and the `.`/`..` pseudo-entries.
pub fn parse(lines: &[String]) -> Vec<Entry> {
    lines
        .iter()
        .filter_map(|line| parse_line(line))
        .filter(|entry| entry.name != "." && entry.name != "..")
        .collect()
}

fn parse_line(line: &str) -> Option<Entry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 {
        return None;
    }
    let perms = fields[0];
    if perms.len() != 10 {
        return None;
    }
    let is_dir = perms.starts_with('d');
    let is_symlink = perms.starts_with('l');
    let mode = parse_mode(perms);
    let size: u64 = fields[4].parse().ok()?;

    // Fields 5..=7 are the date (month, day, time-or-year); the name starts
    // at field 8 and may contain spaces, so rejoin everything after the
    // fixed-width prefix instead of trusting a single whitespace-split token.
    let prefix_end = nth_field_end(line, 8)?;
    let rest = line[prefix_end..].trim_start();
    if rest.is_empty() {
        return None;
    }

    let (name, link_target) = if is_symlink {
        match rest.split_once(" -> ") {
            Some((name, target)) => (name.to_string(), Some(target.to_string())),
            None => (rest.to_string(), None),
        }
    } else {
        (rest.to_string(), None)
    };

    Some(Entry {
        name,
        is_dir,
        is_symlink,
        size,
        mode,
        link_target,
    })
}

/// Returns the byte offset just past the end of the `n`-th whitespace
/// separated field (1-indexed), so callers can split "structured prefix"
/// from "free-form name" without losing embedded spaces in the name.
fn nth_field_end(line: &str, n: usize) -> Option<usize> {
    let mut seen = 0;
    let mut in_field = false;
    for (idx, ch) in line.char_indices() {
        if ch.is_whitespace() {
            in_field = false;
        } else if !in_field {
            in_field = true;
            seen += 1;
            if seen == n {
                // find the end of this field.
                let end = line[idx..]
                    .find(char::is_whitespace)
                    .map_or(line.len(), |rel| idx + rel);
                return Some(end);
            }
        }
    }
    None
}

fn parse_mode(perms: &str) -> u32 {
    let bytes = perms.as_bytes();
    let mut mode = 0u32;
    let triplets = [(1, 6), (4, 3), (7, 0)];
    for (start, shift) in triplets {
        if bytes[start] != b'-' {
            mode |= 0b100 << shift;
        }
        if bytes[start + 1] != b'-' {
            mode |= 0b010 << shift;
        }
        if bytes[start + 2] != b'-' && bytes[start + 2] != b'S' && bytes[start + 2] != b'T' {
            mode |= 0b001 << shift;
        }
    }
    mode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_regular_file_line() {
        let lines = vec!["-rw-r--r--  1 owner group  1234 Jan 01 00:00 hello.txt".to_string()];
        let entries = parse(&lines);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello.txt");
        assert_eq!(entries[0].size, 1234);
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].mode, 0o644);
    }

    #[test]
    fn parses_a_directory_line() {
        let lines = vec!["drwxr-xr-x  2 owner group  4096 Jan 01 00:00 subdir".to_string()];
        let entries = parse(&lines);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].mode, 0o755);
    }

    #[test]
    fn parses_a_symlink_with_target() {
        let lines =
            vec!["lrwxrwxrwx  1 owner group  3 Jan 01 00:00 link -> target.txt".to_string()];
        let entries = parse(&lines);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_symlink);
        assert_eq!(entries[0].link_target.as_deref(), Some("target.txt"));
    }

    #[test]
    fn skips_dot_and_dotdot_and_total_header() {
        let lines = vec![
            "total 8".to_string(),
            "drwxr-xr-x 2 owner group 4096 Jan 01 00:00 .".to_string(),
            "drwxr-xr-x 2 owner group 4096 Jan 01 00:00 ..".to_string(),
            "-rw-r--r-- 1 owner group 0 Jan 01 00:00 empty.txt".to_string(),
        ];
        let entries = parse(&lines);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "empty.txt");
    }

    #[test]
    fn handles_names_with_embedded_spaces() {
        let lines =
            vec!["-rw-r--r--  1 owner group  10 Jan 01 00:00 a file with spaces.txt".to_string()];
        let entries = parse(&lines);
        assert_eq!(entries[0].name, "a file with spaces.txt");
    }
}
