//! Archive entry naming.
//!
//! Units live at `<anything>/<module number>/<video file>`. The module number
//! orders modules; the file name without extension is the video key.

use std::cmp::Ordering;

use super::error::WorkerError;

/// Parsed location of one unit inside its archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitKey {
    /// Module directory name as written in the archive.
    pub module_key: String,
    pub module_number: u64,
    pub video_key: String,
    pub file_name: String,
}

impl UnitKey {
    /// Module number ascending, then file name.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        self.module_number
            .cmp(&other.module_number)
            .then_with(|| self.file_name.cmp(&other.file_name))
    }
}

pub fn parse_entry_name(name: &str) -> Result<UnitKey, WorkerError> {
    let malformed = || WorkerError::MalformedEntry {
        name: name.to_string(),
    };

    let mut parts = name.rsplitn(3, '/');
    let file_name = parts.next().filter(|f| !f.is_empty()).ok_or_else(malformed)?;
    let module_key = parts.next().ok_or_else(malformed)?;
    // The module directory must itself sit below a `/`.
    parts.next().ok_or_else(malformed)?;

    if module_key.is_empty() || !module_key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let module_number = module_key.parse::<u64>().map_err(|_| malformed())?;

    let video_key = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };

    Ok(UnitKey {
        module_key: module_key.to_string(),
        module_number,
        video_key: video_key.to_string(),
        file_name: file_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_name() {
        let key = parse_entry_name("Rust Course/03/01 - Ownership.mp4").unwrap();
        assert_eq!(key.module_key, "03");
        assert_eq!(key.module_number, 3);
        assert_eq!(key.video_key, "01 - Ownership");
        assert_eq!(key.file_name, "01 - Ownership.mp4");
    }

    #[test]
    fn test_leading_slash_is_enough() {
        let key = parse_entry_name("/1/intro.mp4").unwrap();
        assert_eq!(key.module_key, "1");
    }

    #[test]
    fn test_malformed_entries() {
        for name in [
            "intro.mp4",
            "1/intro.mp4",
            "course/one/intro.mp4",
            "course/1/",
            "course/1a/intro.mp4",
        ] {
            assert!(
                matches!(parse_entry_name(name), Err(WorkerError::MalformedEntry { .. })),
                "{} should be malformed",
                name
            );
        }
    }

    #[test]
    fn test_sort_numeric_modules_then_lexical() {
        let mut keys: Vec<UnitKey> = [
            "c/10/a.mp4",
            "c/2/b.mp4",
            "c/2/a.mp4",
            "c/1/z.mp4",
        ]
        .iter()
        .map(|n| parse_entry_name(n).unwrap())
        .collect();
        keys.sort_by(|a, b| a.sort_cmp(b));

        let order: Vec<String> = keys
            .iter()
            .map(|k| format!("{}/{}", k.module_key, k.video_key))
            .collect();
        assert_eq!(order, vec!["1/z", "2/a", "2/b", "10/a"]);
    }
}
