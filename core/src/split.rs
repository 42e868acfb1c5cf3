//! Outbound body splitting

/// Split a body into pieces of at most `max_bytes` bytes.
///
/// Pieces never cut a multi-byte character and prefer to end right after a
/// whitespace run. No characters are dropped: concatenating the pieces in
/// order reproduces `body` exactly. A body that already fits is returned as
/// a single piece.
pub fn split_body(body: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(4);
    let mut pieces = Vec::new();
    let mut rest = body;

    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }

        // Break after the last space in the window when there is one
        if let Some(space) = rest[..cut].rfind(char::is_whitespace) {
            let after = space + rest[space..].chars().next().map_or(1, char::len_utf8);
            if after > 0 && after < rest.len() {
                cut = after;
            }
        }

        let (piece, tail) = rest.split_at(cut);
        pieces.push(piece);
        rest = tail;
    }

    pieces.push(rest);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_body_is_untouched() {
        assert_eq!(split_body("hello", 400), vec!["hello"]);
        assert_eq!(split_body("", 400), vec![""]);
    }

    #[test]
    fn test_prefers_whitespace() {
        let pieces = split_body("aaaa bbbb cccc", 10);
        assert_eq!(pieces, vec!["aaaa bbbb ", "cccc"]);
    }

    #[test]
    fn test_hard_split_without_whitespace() {
        let body = "x".repeat(25);
        let pieces = split_body(&body, 10);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| p.len() <= 10));
        assert_eq!(pieces.concat(), body);
    }

    #[test]
    fn test_never_breaks_multibyte_characters() {
        let body = "héllo wörld ünïcödé ✓✓✓✓✓✓✓✓".repeat(5);
        for max in [4, 5, 7, 13, 40] {
            let pieces = split_body(&body, max);
            assert!(pieces.iter().all(|p| p.len() <= max.max(4)));
            assert_eq!(pieces.concat(), body);
        }
    }
}
