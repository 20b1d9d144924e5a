//! Analysis styles: the fixed instruction attached to each style id.

use std::collections::BTreeMap;

/// Style whose instruction is replaced by caller-supplied text.
pub const CUSTOM_STYLE: &str = "custom";

pub const DEFAULT_INSTRUCTION: &str = "Provide a general analysis of the video content.";

const STYLES: &[(&str, &str)] = &[
    ("general", DEFAULT_INSTRUCTION),
    (
        "ui_interaction",
        "Analyze the user interface interactions in the video.",
    ),
    (
        "emotion",
        "Detect and analyze emotions of people in the video.",
    ),
    (
        "object_detection",
        "Identify and describe key objects in the video.",
    ),
    (
        "text_recognition",
        "Recognize and transcribe any text visible in the video.",
    ),
    (
        CUSTOM_STYLE,
        "Follow the caller's own instructions for analyzing the video.",
    ),
];

/// All known styles and their instructions.
pub fn list_styles() -> BTreeMap<&'static str, &'static str> {
    STYLES.iter().copied().collect()
}

/// Resolves a style id to the instruction sent to the summarizer.
///
/// Known ids map to their fixed instruction. The custom style and unknown
/// ids use `custom_instructions`, or [`DEFAULT_INSTRUCTION`] when those are
/// blank.
pub fn resolve_instruction(style_id: &str, custom_instructions: Option<&str>) -> String {
    if style_id != CUSTOM_STYLE {
        if let Some((_, instruction)) = STYLES.iter().find(|(id, _)| *id == style_id) {
            return instruction.to_string();
        }
    }
    match custom_instructions.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => DEFAULT_INSTRUCTION.to_string(),
    }
}
