//! Word wrapping and overlap splicing used by [`super::chunk_text`].

/// Greedy word wrap: words are joined by single spaces into lines of at most
/// `width` characters. A word longer than `width` is cut into `width`-sized
/// pieces; the last piece may be continued by the words that follow it.
pub(crate) fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if line_len > 0 && line_len + 1 + word_len <= width {
            line.push(' ');
            line.push_str(word);
            line_len += 1 + word_len;
            continue;
        }
        if line_len > 0 {
            lines.push(std::mem::take(&mut line));
            line_len = 0;
        }
        if word_len <= width {
            line.push_str(word);
            line_len = word_len;
            continue;
        }

        let mut pieces = split_chars(word, width);
        if let Some(last) = pieces.pop() {
            lines.extend(pieces);
            line_len = last.chars().count();
            line = last;
        }
    }

    if line_len > 0 {
        lines.push(line);
    }
    lines
}

/// Consecutive pieces of at most `width` characters.
fn split_chars(word: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars.chunks(width).map(|c| c.iter().collect()).collect()
}

/// The last `n` characters of `text` (all of it when shorter).
pub(crate) fn last_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Prefix each segment after the first with the tail of the previous
/// *output* segment, so overlap cascades through the sequence.
pub(crate) fn splice_overlap(segments: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || segments.len() < 2 {
        return segments;
    }
    let mut out: Vec<String> = Vec::with_capacity(segments.len());
    for segment in segments {
        let next = match out.last() {
            Some(prev) => {
                let tail = last_chars(prev, overlap);
                let mut s = String::with_capacity(tail.len() + segment.len());
                s.push_str(tail);
                s.push_str(&segment);
                s
            }
            None => segment,
        };
        out.push(next);
    }
    out
}
