use lp_core::{FieldKind, Language, ProviderError};

pub const TEXT_OPEN: &str = "<<<";
pub const TEXT_CLOSE: &str = ">>>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Translate,
    Polish,
}

impl Task {
    fn label(self) -> &'static str {
        match self {
            Task::Translate => "translate",
            Task::Polish => "polish",
        }
    }
}

fn field_rules(field: FieldKind) -> &'static str {
    match field {
        FieldKind::Title => "Return a single headline line, no trailing period, no quotes.",
        FieldKind::Content => "Keep every paragraph break and every fact, figure, name and quote.",
        FieldKind::Summary => "Return two or three plain sentences.",
    }
}

fn frame(task: Task, field: FieldKind, from: Language, to: Language, instructions: &str, text: &str) -> String {
    format!(
        "TASK: {}\nFIELD: {field}\nFROM: {}\nTO: {}\n{instructions}\n{}\nAnswer with the resulting text only.\n{TEXT_OPEN}\n{text}\n{TEXT_CLOSE}",
        task.label(),
        from.english_name(),
        to.english_name(),
        field_rules(field),
    )
}

pub fn translate_prompt(text: &str, field: FieldKind, from: Language, to: Language) -> String {
    let instructions = format!(
        "You are a professional news translator. Translate the news {field} below from {} into {}.",
        from.english_name(),
        to.english_name()
    );
    frame(Task::Translate, field, from, to, &instructions, text)
}

pub fn polish_prompt(text: &str, field: FieldKind, language: Language) -> String {
    let instructions = format!(
        "You are a senior news editor. Rewrite the news {field} below in fluent, natural {} \
         newsroom style without changing its meaning.",
        language.english_name()
    );
    frame(Task::Polish, field, language, language, &instructions, text)
}

/// Parsed view of a prompt built by this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptParts<'a> {
    pub task: Task,
    pub target: &'a str,
    pub text: &'a str,
}

pub fn parse_prompt(prompt: &str) -> Option<PromptParts<'_>> {
    let task = match prompt.lines().next()?.strip_prefix("TASK: ")? {
        "translate" => Task::Translate,
        "polish" => Task::Polish,
        _ => return None,
    };
    let target = prompt.lines().find_map(|l| l.strip_prefix("TO: "))?;
    let start = prompt.find(&format!("{TEXT_OPEN}\n"))? + TEXT_OPEN.len() + 1;
    let end = prompt.rfind(&format!("\n{TEXT_CLOSE}"))?;
    let text = prompt.get(start..end)?;
    Some(PromptParts { task, target, text })
}

/// Strips code fences and wrapping quotes. Titles keep their first line only.
pub fn clean_output(raw: &str, field: FieldKind) -> Result<String, ProviderError> {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("```") {
        let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or(inner);
        text = inner.strip_suffix("```").unwrap_or(inner).trim();
    }
    for (open, close) in [('"', '"'), ('“', '”'), ('「', '」')] {
        if text.len() > 1 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }
    let text = match field {
        FieldKind::Title => text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or(""),
        FieldKind::Content | FieldKind::Summary => text,
    };
    if text.is_empty() {
        return Err(ProviderError::Malformed("empty completion".to_string()));
    }
    Ok(text.to_string())
}
