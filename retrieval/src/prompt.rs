//! Composite prompt assembly.

use sct_embeddings::RetrievalResult;

use crate::generation::CompletionRequest;

/// System instructions sent with every answer request.
pub const RULES: &str = "\
You are a semiconductor manufacturing domain assistant.

General expectations:
1. Start with a direct, one-sentence definition or conclusion that answers the question.
2. Structure every answer as: Definition, Short Explanation, Optional Supporting Detail.
3. Keep total length within about 200 words (3 to 6 sentences).
4. Give cause-effect or process reasoning rather than listing entities.
5. Use precise semiconductor terminology (wafer, lithography, GOX, linewidth, binning, yield).
6. Mention formulas or standards (Cp, Cpk, ISO, SPC) only if relevant and factual.
7. Keep the discussion tied to semiconductor manufacturing, yield or process control.
8. Write in clear, professional technical language; use short paragraphs or bullet points when needed.
9. Keep a neutral, factual tone without speculation.
10. Add an \"Additional Notes:\" section only if it adds a limitation or a brief example.

Combine your own engineering knowledge with the Digital Reference context.
When binning research is provided, integrate it directly into the answer.";

pub const PRIMARY_HEADING: &str = "Digital Reference Context:";
pub const SECONDARY_HEADING: &str = "Relevant Binning Research:";

/// Separator between statements of one reference entry.
const STATEMENT_SEPARATOR: &str = " | ";

/// Statements kept per reference entry.
const MAX_STATEMENTS: usize = 10;

const FOLLOWUP_SYSTEM: &str = "You suggest follow-up questions about semiconductor manufacturing.";

/// Build the answer request.
///
/// The secondary block is left out entirely when `secondary` is `None` or
/// empty.
pub fn answer_request(
    question: &str,
    primary: &[RetrievalResult],
    secondary: Option<&[RetrievalResult]>,
    temperature: f32,
) -> CompletionRequest {
    let mut user = String::new();

    user.push_str(PRIMARY_HEADING);
    user.push('\n');
    if primary.is_empty() {
        user.push_str("(no matching entries)\n");
    }
    for result in primary {
        user.push_str(&format!("[{}]\n{}\n\n", result.unit_id, result.text));
    }

    if let Some(secondary) = secondary.filter(|s| !s.is_empty()) {
        user.push('\n');
        user.push_str(SECONDARY_HEADING);
        user.push('\n');
        for result in secondary {
            user.push_str(&format!("- {}\n", result.text));
        }
    }

    user.push_str(&format!(
        "\nQuestion: {question}\n\nProvide a clear, technically correct, concise answer."
    ));

    CompletionRequest {
        system: RULES.to_string(),
        user,
        temperature,
    }
}

/// Ask again for an answer that was over `max_words`.
///
/// The original question context travels with the request, followed by the
/// rejected answer.
pub fn shorten_request(
    original: &CompletionRequest,
    answer: &str,
    max_words: usize,
) -> CompletionRequest {
    CompletionRequest {
        system: original.system.clone(),
        user: format!(
            "{}\n\nPrevious answer:\n{answer}\n\n\
             Please provide a shorter response (under {max_words} words). \
             Current response has {} words.",
            original.user,
            word_count(answer)
        ),
        temperature: original.temperature,
    }
}

/// Drop class-hierarchy statements from a `" | "`-separated reference entry
/// and keep the first ten of the rest.
pub fn compact_reference(text: &str) -> String {
    text.split(STATEMENT_SEPARATOR)
        .filter(|statement| !statement.contains("subClassOf"))
        .take(MAX_STATEMENTS)
        .collect::<Vec<_>>()
        .join(STATEMENT_SEPARATOR)
}

/// Build the request for three follow-up questions.
pub fn followup_request(question: &str, answer: &str, temperature: f32) -> CompletionRequest {
    CompletionRequest {
        system: FOLLOWUP_SYSTEM.to_string(),
        user: format!(
            "Generate exactly 3 short follow-up semiconductor questions.\n\n\
             Original question: {question}\n\
             Answer: {answer}\n\n\
             Return only:\n1. ...\n2. ...\n3. ..."
        ),
        temperature,
    }
}

/// Keep at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep at most `max_words` whitespace-separated words, marking the cut.
///
/// The kept prefix is sliced from `text`, so line breaks and spacing inside
/// it survive.
pub fn limit_words(text: &str, max_words: usize) -> String {
    let mut words = 0;
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            if words == max_words {
                return format!("{}...", text[..i].trim_end());
            }
            words += 1;
            in_word = true;
        }
    }
    text.to_string()
}
