use indexmap::IndexSet;

/// Workspace-wide string literal pool. Identical literals share one id, so
/// every script that pushes `"hello"` refers to the same `str_<id>`.
#[derive(Debug, Default)]
pub struct StringPool {
    strings: IndexSet<String>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> usize {
        if let Some(id) = self.strings.get_index_of(text) {
            return id;
        }
        self.strings.insert_full(text.to_owned()).0
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Literals in insertion order, paired with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(id, text)| (id, text.as_str()))
    }
}

/// Escapes text for a C string literal. Non-ASCII and control bytes become
/// octal escapes; unlike `\x`, an octal escape cannot swallow a digit that
/// happens to follow it.
pub fn escape_c(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for &byte in text.as_bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7E => out.push(byte as char),
            _ => {
                out.push_str(&format!("\\{byte:03o}"));
            }
        }
    }
    out
}
