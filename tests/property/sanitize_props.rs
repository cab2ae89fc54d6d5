//! Event payload sanitization properties.

use proptest::prelude::*;

use bulkshare_rs::events::sanitize_text;

/// Arbitrary Unicode text, including control and zero-width characters.
fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(any::<char>(), 0..300).prop_map(|v| v.into_iter().collect())
}

fn is_banned(ch: char) -> bool {
    ch.is_control()
        || matches!(
            ch,
            '\u{2028}' | '\u{2029}' | '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}'
        )
}

proptest! {
    /// No control, separator, or zero-width characters survive, and output
    /// never exceeds the 100-character field cap.
    #[test]
    fn output_is_clean_and_bounded(input in arb_text()) {
        let out = sanitize_text(&input);
        prop_assert!(out.chars().count() <= 100);
        for ch in out.chars() {
            prop_assert!(!is_banned(ch), "banned char {ch:?} survived");
        }
    }

    /// Sanitization is idempotent.
    #[test]
    fn idempotent(input in arb_text()) {
        let once = sanitize_text(&input);
        prop_assert_eq!(sanitize_text(&once), once.clone());
    }

    /// Clean short strings pass through unchanged.
    #[test]
    fn clean_input_unchanged(input in "[a-zA-Z0-9 .,@-]{0,100}") {
        prop_assert_eq!(sanitize_text(&input), input);
    }

    /// A sanitized field embedded in a JSON string stays one line.
    #[test]
    fn sanitized_json_is_single_line(input in arb_text()) {
        let out = serde_json::to_string(&sanitize_text(&input)).unwrap();
        prop_assert!(!out.contains('\n'));
        prop_assert!(!out.contains('\r'));
    }
}
