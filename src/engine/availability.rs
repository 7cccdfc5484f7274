use crate::model::*;

/// Gaps left in `query` once every `busy` span is taken out. `busy` must be
/// sorted by start; it may overlap itself or stick out past `query`.
pub fn free_within(query: Span, busy: &[Span]) -> Vec<Span> {
    let mut free = Vec::new();
    let mut cursor = query.start;
    for span in busy {
        if span.start >= query.end {
            break;
        }
        if span.start > cursor {
            free.push(Span::new(cursor, span.start));
        }
        cursor = cursor.max(span.end);
        if cursor >= query.end {
            return free;
        }
    }
    if cursor < query.end {
        free.push(Span::new(cursor, query.end));
    }
    free
}
