//! Offline Template Generator
//!
//! Builds arrow-list drafts straight from the notes without calling a model:
//! an opener chosen by mode, one `→` bullet per note item, and a closing line
//! from the angle or mood. Used when no generator endpoint is configured.

use async_trait::async_trait;

use super::{ContentGenerator, GenerationRequest};

const MAX_BULLETS: usize = 4;

fn openers(mode: &str) -> [&'static str; 3] {
    match mode {
        "daily_wins" => ["Today's wins:", "Good day of building:", "Quick update:"],
        "lesson_learned" => [
            "Learned something today:",
            "Lesson from today's build:",
            "Note to self:",
        ],
        "shipping_update" => [
            "Shipped some stuff:",
            "Built in public update:",
            "Out the door today:",
        ],
        _ => ["Quick update:", "Today's progress:", "Build log:"],
    }
}

fn split_items(notes: &str) -> Vec<String> {
    notes
        .split(|c: char| c == ',' || c == ';' || c == '\n')
        .map(|item| item.trim().trim_start_matches(['-', '*', '•']).trim())
        .filter(|item| !item.is_empty())
        .map(|item| {
            let mut chars = item.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .take(MAX_BULLETS)
        .collect()
}

fn closing(variant: usize, mood: Option<&str>, angle: Option<&str>) -> String {
    match (variant % 3, angle, mood) {
        (0, Some(angle), _) => format!("{}. LFG", angle.trim_end_matches('.')),
        (1, Some(angle), Some(mood)) => format!("Feeling {}. Next up: {}", mood, angle),
        (2, _, Some(mood)) => format!("Mood: {}. More tomorrow.", mood),
        (_, Some(angle), _) => format!("Next: {}", angle),
        (_, None, Some(mood)) => format!("Feeling {}. More tomorrow.", mood),
        _ => "More tomorrow.".to_string(),
    }
}

fn render(opener: &str, bullets: &[String], closing: &str) -> String {
    let list: Vec<String> = bullets.iter().map(|b| format!("→ {}", b)).collect();
    format!("{}\n\n{}\n\n{}", opener, list.join("\n"), closing)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Draft generator that needs no external service
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render one draft per variant, each fitted under `max_chars`
    pub fn drafts(&self, request: &GenerationRequest) -> Vec<String> {
        let items = split_items(&request.notes);
        let openers = openers(request.mode.as_str());
        let max_chars = request.max_chars as usize;

        (0..request.max_options as usize)
            .map(|variant| {
                let opener = openers[variant % openers.len()];
                let close = closing(variant, request.mood.as_deref(), request.angle.as_deref());

                // Drop trailing bullets until the draft fits
                let mut bullets = items.clone();
                let mut text = render(opener, &bullets, &close);
                while text.chars().count() > max_chars && bullets.len() > 1 {
                    bullets.pop();
                    text = render(opener, &bullets, &close);
                }
                truncate_chars(&text, max_chars)
            })
            .collect()
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Vec<String>> {
        let drafts = self.drafts(request);
        if drafts.is_empty() {
            anyhow::bail!("template generator produced no drafts");
        }
        Ok(drafts)
    }
}
