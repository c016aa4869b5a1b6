//! Minimal deb822 (Debian control file) parser.
//!
//! Release manifests, Packages indexes and `apt-cache show` output all use
//! this format: paragraphs separated by blank lines, `Field: value` lines, and
//! continuation lines that start with whitespace. Field names are matched
//! case-insensitively, as dpkg does.

/// One paragraph of `Field: value` pairs, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    fields: Vec<(String, String)>,
}

impl Paragraph {
    /// Value of a field. Multi-line values keep their continuation lines
    /// joined with `\n` (leading whitespace stripped, the first line may be
    /// empty).
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field))
            .map(|(_, v)| v.as_str())
    }

    /// Single-line field value, trimmed; `None` if absent or empty.
    pub fn get_trimmed(&self, field: &str) -> Option<&str> {
        self.get(field).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Split `text` into paragraphs.
///
/// PGP armor lines and anything before the first field line are ignored, so
/// clearsigned documents parse the same as their payload.
pub fn parse_paragraphs(text: &str) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut current = Paragraph::default();

    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');

        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = current.fields.last_mut() {
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(line.trim());
            }
            continue;
        }

        if line.starts_with("-----") {
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            current
                .fields
                .push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}
