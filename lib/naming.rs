//! Turning backend titles and file names into path components.

/// Strip a free-text title down to something usable inside one path component.
///
/// Non-ASCII characters are dropped, spaces become `_`, and `/` and NUL are removed.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii() && *c != '/' && *c != '\0')
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

/// Directory name for an experiment or dataset: `{id}-{sanitized title}`.
#[must_use]
pub fn entry_name(id: u64, title: &str) -> String {
    format!("{id}-{}", sanitize(title))
}

/// Recover the numeric id from a name produced by [`entry_name`].
#[must_use]
pub fn parse_entry_id(name: &str) -> Option<u64> {
    name.split('-').next()?.parse().ok()
}

/// Clean a datafile name. Returns `None` when nothing usable is left.
#[must_use]
pub fn file_name(raw: &str) -> Option<String> {
    let name: String = raw
        .chars()
        .filter(|c| c.is_ascii() && *c != '/' && *c != '\0')
        .collect();
    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

/// Clean a datafile's subdirectory into its components.
///
/// Leading, trailing and doubled slashes are dropped, as are `.` and `..` components.
#[must_use]
pub fn subdirectory(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split('/')
        .map(|part| {
            part.chars()
                .filter(|c| c.is_ascii() && *c != '\0')
                .collect::<String>()
        })
        .filter(|part| !matches!(part.as_str(), "" | "." | ".."))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_name_replaces_spaces_and_drops_non_ascii() {
        assert_eq!(entry_name(73, "Beamline Run"), "73-Beamline_Run");
        assert_eq!(entry_name(5, "Run 1"), "5-Run_1");
        assert_eq!(entry_name(9, "Café/Øl\0"), "9-Cafl");
        assert_eq!(entry_name(4, ""), "4-");
    }

    #[test]
    fn entry_ids_round_trip_through_names() {
        assert_eq!(parse_entry_id("73-Beamline_Run"), Some(73));
        assert_eq!(parse_entry_id("5-a-b-c"), Some(5));
        assert_eq!(parse_entry_id("Beamline"), None);
    }

    #[test]
    fn file_names_reject_dot_entries() {
        assert_eq!(file_name("scan.dat").as_deref(), Some("scan.dat"));
        assert_eq!(file_name("a/b.txt").as_deref(), Some("ab.txt"));
        assert_eq!(file_name(".."), None);
        assert_eq!(file_name("ü"), None);
    }

    #[test]
    fn subdirectory_components_are_cleaned() {
        assert_eq!(subdirectory(None), Vec::<String>::new());
        assert_eq!(subdirectory(Some("")), Vec::<String>::new());
        assert_eq!(subdirectory(Some("/a//b/")), vec!["a", "b"]);
        assert_eq!(subdirectory(Some("a/../b/./c")), vec!["a", "b", "c"]);
    }
}
