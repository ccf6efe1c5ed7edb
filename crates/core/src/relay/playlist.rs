//! Playlist reference substitution.

use std::collections::HashMap;

use super::error::RelayError;

/// Replaces every segment file name line in `playlist` with its uploaded
/// reference.
///
/// Matching is by exact file name, never by substring, so the output does not
/// depend on the order references were collected in. Every key of
/// `references` must appear exactly once.
pub fn substitute_segments(
    playlist: &str,
    references: &HashMap<String, String>,
) -> Result<String, RelayError> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(references.len());
    let mut output = String::with_capacity(playlist.len());

    for line in playlist.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        match references.get_key_value(body.trim()) {
            Some((name, reference)) => {
                *seen.entry(name.as_str()).or_default() += 1;
                output.push_str(reference);
            }
            None => output.push_str(body),
        }
        output.push_str(ending);
    }

    for name in references.keys() {
        let occurrences = seen.get(name.as_str()).copied().unwrap_or(0);
        if occurrences != 1 {
            return Err(RelayError::PlaylistMismatch {
                segment: name.clone(),
                occurrences,
            });
        }
    }

    Ok(output)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}
