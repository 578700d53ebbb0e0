//! Span-based source editing.
//!
//! Edits address the original source, so spans taken from one lexer pass
//! stay valid however many replacements are queued before rendering.

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
    seq: usize,
}

#[derive(Debug)]
pub struct Splicer<'a> {
    source: &'a str,
    prefix: String,
    edits: Vec<Edit>,
}

impl<'a> Splicer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            prefix: String::new(),
            edits: Vec::new(),
        }
    }

    pub fn original(&self) -> &'a str {
        self.source
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.source[start..end]
    }

    /// Replace `start..end` of the original source.
    pub fn overwrite(&mut self, start: usize, end: usize, text: impl Into<String>) {
        let seq = self.edits.len();
        self.edits.push(Edit {
            start,
            end,
            text: text.into(),
            seq,
        });
    }

    /// Insert at `pos` of the original source.
    pub fn insert(&mut self, pos: usize, text: impl Into<String>) {
        self.overwrite(pos, pos, text);
    }

    pub fn prepend(&mut self, text: &str) {
        self.prefix.insert_str(0, text);
    }

    pub fn has_changed(&self) -> bool {
        !self.prefix.is_empty() || !self.edits.is_empty()
    }

    /// Render the edited source. An edit overlapping an earlier one is
    /// dropped.
    pub fn render(mut self) -> String {
        self.edits.sort_by_key(|e| (e.start, e.seq));
        let extra: usize = self.edits.iter().map(|e| e.text.len()).sum();
        let mut out = String::with_capacity(self.prefix.len() + self.source.len() + extra);
        out.push_str(&self.prefix);

        let mut cursor = 0;
        for edit in &self.edits {
            if edit.start < cursor || edit.end > self.source.len() || edit.end < edit.start {
                tracing::debug!(start = edit.start, end = edit.end, "overlapping edit dropped");
                continue;
            }
            out.push_str(&self.source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_uses_original_offsets() {
        let source = r#"import a from "a"; import b from "b";"#;
        let mut s = Splicer::new(source);
        s.overwrite(34, 35, "/node_modules/b.js");
        s.overwrite(15, 16, "/@id/a");
        assert_eq!(
            s.render(),
            r#"import a from "/@id/a"; import b from "/node_modules/b.js";"#
        );
    }

    #[test]
    fn test_prepend_and_insert() {
        let mut s = Splicer::new("body();");
        s.prepend("second;");
        s.prepend("first;");
        s.insert(7, "\nend();");
        assert_eq!(s.render(), "first;second;body();\nend();");
    }

    #[test]
    fn test_overlapping_edit_is_dropped() {
        let mut s = Splicer::new("0123456789");
        s.overwrite(2, 6, "x");
        s.overwrite(4, 8, "y");
        assert_eq!(s.render(), "01x6789");
    }

    #[test]
    fn test_unchanged() {
        let s = Splicer::new("let a = 1");
        assert!(!s.has_changed());
        assert_eq!(s.render(), "let a = 1");
    }
}
