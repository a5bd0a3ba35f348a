//! Sentence-bounded text chunking for embedding.

/// Splits `text` into chunks of at most `max_chunk_size` characters,
/// breaking on sentence punctuation.
///
/// Sentences are accumulated greedily. A sentence that alone exceeds the
/// limit is packed word by word instead; a single word longer than the limit
/// is kept whole.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<String> {
    let max_chunk_size = max_chunk_size.max(1);
    let normalized = normalize_whitespace(text);

    let mut chunks = Vec::new();
    let mut current = Accumulator::new(max_chunk_size);

    for sentence in split_sentences(&normalized) {
        if char_len(sentence) > max_chunk_size {
            current.flush_into(&mut chunks);
            let mut words = Accumulator::new(max_chunk_size);
            for word in sentence.split(' ') {
                if !words.try_push(word) {
                    words.flush_into(&mut chunks);
                    words.try_push(word);
                }
            }
            words.flush_into(&mut chunks);
            continue;
        }

        if !current.try_push(sentence) {
            current.flush_into(&mut chunks);
            current.try_push(sentence);
        }
    }
    current.flush_into(&mut chunks);

    chunks
}

struct Accumulator {
    buf: String,
    len: usize,
    max: usize,
}

impl Accumulator {
    fn new(max: usize) -> Self {
        Self {
            buf: String::new(),
            len: 0,
            max,
        }
    }

    /// Appends `piece` if it fits. An empty accumulator always accepts.
    fn try_push(&mut self, piece: &str) -> bool {
        let piece_len = char_len(piece);
        if self.len == 0 {
            self.buf.push_str(piece);
            self.len = piece_len;
            return true;
        }
        if self.len + 1 + piece_len > self.max {
            return false;
        }
        self.buf.push(' ');
        self.buf.push_str(piece);
        self.len += 1 + piece_len;
        true
    }

    fn flush_into(&mut self, chunks: &mut Vec<String>) {
        if self.len > 0 {
            chunks.push(std::mem::take(&mut self.buf));
            self.len = 0;
        }
    }
}

/// Splits after `.`, `!` or `?` when followed by a space or the end of text.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = match chars.peek() {
            None => true,
            Some((_, next)) => *next == ' ',
        };
        if at_boundary {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_chunk_per_sentence_at_minimum_size() {
        assert_eq!(chunk_text("A. B. C.", 1), vec!["A.", "B.", "C."]);
    }

    #[test]
    fn test_sentences_accumulate_up_to_limit() {
        let chunks = chunk_text("One. Two. Three. Four.", 10);
        assert_eq!(chunks, vec!["One. Two.", "Three.", "Four."]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_everything_fits_in_one_chunk() {
        assert_eq!(
            chunk_text("Cap rate is 6.5%. NOI is $1.2M!", 1000),
            vec!["Cap rate is 6.5%. NOI is $1.2M!"]
        );
    }

    #[test]
    fn test_decimal_points_do_not_split() {
        assert_eq!(chunk_text("Price 4.25 million. Done.", 20), vec!["Price 4.25 million.", "Done."]);
    }

    #[test]
    fn test_whitespace_is_normalized() {
        assert_eq!(
            chunk_text("  Line one.\n\n  Line\ttwo?  ", 1000),
            vec!["Line one. Line two?"]
        );
    }

    #[test]
    fn test_trailing_text_without_punctuation_is_kept() {
        assert_eq!(chunk_text("Intro. Tenant roster", 14), vec!["Intro.", "Tenant roster"]);
    }

    #[test]
    fn test_long_sentence_is_packed_by_words() {
        let chunks = chunk_text("alpha beta gamma delta.", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma", "delta."]);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_text("", 1000).is_empty());
        assert!(chunk_text(" \n\t ", 1000).is_empty());
    }

    #[test]
    fn test_limit_counts_characters_not_bytes() {
        let chunks = chunk_text("Café. Déjà.", 11);
        assert_eq!(chunks, vec!["Café. Déjà."]);
    }
}
