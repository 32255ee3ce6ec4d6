//! Sentence batching for long synthesis inputs.
//!
//! The synthesis model has a hard window on speech tokens, so long texts are
//! split into sentence batches whose estimated speech-token count stays under
//! the window. Speech tokens run about 7x text tokens, doubled when
//! classifier-free guidance is active.

/// Default speech-token cap per synthesis batch
pub const MAX_SPEECH_TOKENS: u32 = 900;

const SPEECH_TOKENS_PER_WORD: u32 = 7;

/// Estimate speech tokens for a sentence from its whitespace word count
pub fn estimate_speech_tokens(text: &str, cfg_weight: f32) -> u32 {
    let words = text.split_whitespace().count() as u32;
    let mut tokens = words * SPEECH_TOKENS_PER_WORD;
    if cfg_weight > 0.0 {
        tokens *= 2;
    }
    tokens
}

/// Split text into sentences on terminal punctuation, keeping the terminator.
///
/// Returns the whole input as a single sentence when no terminator is found.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '\u{2026}') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    if sentences.is_empty() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
    }

    sentences
}

/// Group sentences into batches whose estimated speech tokens stay under the
/// cap. A single over-long sentence still forms its own batch.
pub fn split_into_batches(text: &str, max_speech_tokens: u32, cfg_weight: f32) -> Vec<String> {
    let sentences = split_into_sentences(text);

    let mut batches = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0u32;

    for sentence in sentences {
        let estimate = estimate_speech_tokens(&sentence, cfg_weight);

        if current_tokens + estimate > max_speech_tokens && !current.is_empty() {
            batches.push(current.trim().to_string());
            current.clear();
            current_tokens = 0;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
        current_tokens += estimate;
    }

    if !current.trim().is_empty() {
        batches.push(current.trim().to_string());
    }

    batches
}
