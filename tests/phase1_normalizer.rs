use copilot::kernel::normalizer::normalize;

#[test]
fn test_token_spans_point_back_into_original() {
    let raw = "  Remind me, to SUBMIT   the report!! ";
    let text = normalize(raw);

    // 1. Every token is its original slice, lower-cased
    for token in text.tokens() {
        assert_eq!(raw[token.span.start..token.span.end].to_lowercase(), token.text);
    }

    // 2. Spans are ordered and never overlap
    for pair in text.tokens().windows(2) {
        assert!(pair[0].span.end <= pair[1].span.start, "spans overlap: {:?}", pair);
    }

    let words: Vec<&str> = text.tokens().iter().map(|t| t.text.as_str()).collect();
    assert_eq!(words, vec!["remind", "me", "to", "submit", "the", "report"]);
}

#[test]
fn test_whitespace_only_input_yields_nothing() {
    let text = normalize(" \t \n ");
    assert!(text.is_empty());
    assert_eq!(text.normalized(), "");
    assert!(text.full_span().is_none());
}

#[test]
fn test_inner_punctuation_survives() {
    let text = normalize("Meet at 5:30 p.m. on 3/14, don't forget!");
    let words: Vec<&str> = text.tokens().iter().map(|t| t.text.as_str()).collect();
    assert_eq!(words, vec!["meet", "at", "5:30", "p.m", "on", "3/14", "don't", "forget"]);
}

#[test]
fn test_normalized_string_collapses_whitespace() {
    let text = normalize("Where   IS\tthe  Library");
    assert_eq!(text.normalized(), "where is the library");
    // Quoting back uses the original casing
    let span = text.span_of(3, 3).unwrap();
    assert_eq!(text.slice(span), "Library");
}

#[test]
fn test_punctuation_only_words_are_dropped() {
    let text = normalize("ok ... !! fine");
    assert_eq!(text.len(), 2);
    assert_eq!(text.word(1), Some("fine"));
}

#[test]
fn test_only_whitespace_splits_words() {
    let text = normalize("Hello,World. Bye!");

    // 1. Joined punctuation does not split a word; edge punctuation is trimmed
    let words: Vec<&str> = text.tokens().iter().map(|t| t.text.as_str()).collect();
    assert_eq!(words, vec!["hello,world", "bye"]);

    // 2. The normalized string keeps punctuation and is a fixed point
    assert_eq!(text.normalized(), "hello,world. bye!");
    assert_eq!(normalize(text.normalized()).normalized(), text.normalized());
}
