use common::error::AppError;

/// A window of the ingested text. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub sequence_index: usize,
    pub source_document: String,
}

/// Splits `text` into windows of `chunk_size` chars, each starting
/// `chunk_size - overlap` chars after the previous one. Stops at the first
/// window that reaches the end of the text, so short or empty text yields a
/// single chunk.
pub fn split(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    source_document: &str,
) -> Result<Vec<Chunk>, AppError> {
    if chunk_size == 0 {
        return Err(AppError::Validation(
            "chunk_size must be greater than zero".into(),
        ));
    }
    if overlap >= chunk_size {
        return Err(AppError::Validation(format!(
            "chunk overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start: usize = 0;
    loop {
        let end = start.saturating_add(chunk_size).min(chars.len());
        chunks.push(Chunk {
            text: chars[start..end].iter().collect(),
            sequence_index: chunks.len(),
            source_document: source_document.to_owned(),
        });

        if end >= chars.len() {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_count(len: usize, chunk_size: usize, overlap: usize) -> usize {
        if len <= chunk_size {
            1
        } else {
            (len - overlap).div_ceil(chunk_size - overlap)
        }
    }

    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut text = String::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let skip = if idx == 0 { 0 } else { overlap };
            text.extend(chunk.text.chars().skip(skip));
        }
        text
    }

    #[test]
    fn test_short_and_empty_text_yield_one_chunk() {
        let empty = split("", 10, 2, "doc").expect("split");
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].text, "");

        let short = split("Skolkovo Institute collaborates with MIT", 2_000, 200, "doc")
            .expect("split");
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].text, "Skolkovo Institute collaborates with MIT");
        assert_eq!(short[0].source_document, "doc");
    }

    #[test]
    fn test_windows_overlap_and_reconstruct() {
        let text = "abcdefghijklmnopqrstuvwxy";
        let chunks = split(text, 10, 5, "doc").expect("split");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["abcdefghij", "fghijklmno", "klmnopqrst", "pqrstuvwxy"]
        );
        assert_eq!(reconstruct(&chunks, 5), text);
        assert!(chunks
            .iter()
            .enumerate()
            .all(|(idx, c)| c.sequence_index == idx));
    }

    #[test]
    fn test_chunk_count_matches_formula() {
        let text: String = "Сколтех и MIT ".repeat(37);
        let len = text.chars().count();

        for (chunk_size, overlap) in [(1, 0), (7, 3), (50, 0), (64, 63), (100, 10), (len, 5)] {
            let chunks = split(&text, chunk_size, overlap, "doc").expect("split");
            assert_eq!(
                chunks.len(),
                expected_count(len, chunk_size, overlap),
                "chunk_size={chunk_size} overlap={overlap}"
            );
            assert_eq!(reconstruct(&chunks, overlap), text);
        }
    }

    #[test]
    fn test_multibyte_text_is_split_on_char_boundaries() {
        let chunks = split("привет мир", 4, 1, "doc").expect("split");

        assert_eq!(chunks[0].text, "прив");
        assert_eq!(chunks[1].text, "вет ");
        assert_eq!(reconstruct(&chunks, 1), "привет мир");
    }

    #[test]
    fn test_invalid_bounds_are_rejected() {
        assert!(matches!(
            split("text", 0, 0, "doc"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            split("text", 5, 5, "doc"),
            Err(AppError::Validation(_))
        ));
    }
}
