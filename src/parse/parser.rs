use crate::ast::Location;

/// Maps byte offsets into a source text back to row/column positions.
pub(crate) struct SourceMap<'s> {
    file: &'s str,
    source: &'s str,
    line_starts: Vec<usize>,
}

impl<'s> SourceMap<'s> {
    pub(crate) fn new(file: &'s str, source: &'s str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            file,
            source,
            line_starts,
        }
    }

    /// Offset of `rest`, which must be a suffix of the source.
    pub(crate) fn offset(&self, rest: &str) -> usize {
        self.source.len().saturating_sub(rest.len())
    }

    /// 1-based row and column (in chars) of a byte offset.
    pub(crate) fn location(&self, offset: usize) -> Location {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let start = self
            .line_starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(0);
        let col = self
            .source
            .get(start..offset)
            .map_or(1, |prefix| prefix.chars().count() + 1);
        Location {
            file: self.file.to_owned(),
            row: u32::try_from(line.max(1)).unwrap_or(u32::MAX),
            col: u32::try_from(col).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_first_column() {
        let map = SourceMap::new("f", "abc\ndef");
        let loc = map.location(0);
        assert_eq!((loc.row, loc.col), (1, 1));
    }

    #[test]
    fn offsets_after_newlines() {
        let source = "abc\ndef\n\nxyz";
        let map = SourceMap::new("f", source);
        let loc = map.location(map.offset("ef\n\nxyz"));
        assert_eq!((loc.row, loc.col), (2, 2));
        let loc = map.location(map.offset("xyz"));
        assert_eq!((loc.row, loc.col), (4, 1));
    }

    #[test]
    fn columns_count_chars_not_bytes() {
        let source = "\"é\" x";
        let map = SourceMap::new("f", source);
        let loc = map.location(map.offset("x"));
        assert_eq!(loc.col, 5);
    }
}
