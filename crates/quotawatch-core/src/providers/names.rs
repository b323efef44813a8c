const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("amp", "Amp"),
    ("antigravity", "Antigravity"),
    ("augment", "Augment"),
    ("claude", "Claude"),
    ("codex", "Codex"),
    ("copilot", "GitHub Copilot"),
    ("cursor", "Cursor"),
    ("factory", "Droid"),
    ("gemini", "Gemini"),
    ("kimi", "Kimi"),
    ("kiro", "Kiro"),
    ("minimax", "MiniMax"),
    ("openai", "OpenAI"),
    ("opencode", "OpenCode"),
    ("openrouter", "OpenRouter"),
    ("vertexai", "Vertex AI"),
    ("zai", "z.ai"),
];

/// Case-insensitive lookup; unknown ids come back verbatim.
pub fn display_name(id: &str) -> String {
    DISPLAY_NAMES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(id))
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| id.to_string())
}
