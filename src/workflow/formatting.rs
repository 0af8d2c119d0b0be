//! 题目格式化
//!
//! 把事实渲染为题目文本，并做格式一致性检查：
//! 禁用标点、重复标点和过长文本都会被拒绝。

use regex::Regex;

use crate::error::{AppError, AppResult};
use crate::models::content::Fact;

/// 模板 ID → 模板文本，`{statement}` 为占位符
const TEMPLATES: &[(&str, &str)] = &[
    ("plain", "{statement}"),
    ("question", "{statement} = ?"),
    ("fill_blank", "{statement} = ___"),
    ("equation", "What is {statement}?"),
];

const FORBIDDEN_PUNCTUATION: &str = r"[;{}\[\]<>|\\]|[!?]{2,}|\.{2,}";

pub fn template(template_id: &str) -> Option<&'static str> {
    TEMPLATES
        .iter()
        .find(|(id, _)| *id == template_id)
        .map(|(_, text)| *text)
}

pub fn is_known_template(template_id: &str) -> bool {
    template(template_id).is_some()
}

/// 格式检查不通过的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatRejection {
    Empty,
    ForbiddenPunctuation(String),
    TooVerbose { words: usize, max_words: usize },
}

impl std::fmt::Display for FormatRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatRejection::Empty => write!(f, "文本为空"),
            FormatRejection::ForbiddenPunctuation(found) => write!(f, "包含禁用标点 '{}'", found),
            FormatRejection::TooVerbose { words, max_words } => {
                write!(f, "文本过长: {} 词 (上限 {})", words, max_words)
            }
        }
    }
}

/// 题目格式化器
pub struct QuestionFormatter {
    template: &'static str,
    forbidden: Regex,
    max_words: usize,
}

impl QuestionFormatter {
    pub fn new(template_id: &str, max_words: usize) -> AppResult<Self> {
        let template = template(template_id)
            .ok_or_else(|| AppError::InvalidRequest(format!("未知的格式模板: {}", template_id)))?;
        let forbidden = Regex::new(FORBIDDEN_PUNCTUATION)
            .map_err(|e| AppError::InvalidRequest(format!("禁用标点规则无效: {}", e)))?;

        Ok(Self {
            template,
            forbidden,
            max_words,
        })
    }

    /// 渲染并检查
    pub fn format(&self, fact: &Fact) -> Result<String, FormatRejection> {
        let text = self.template.replace("{statement}", fact.statement.trim());
        self.check(&text)?;
        Ok(text)
    }

    pub fn check(&self, text: &str) -> Result<(), FormatRejection> {
        if text.trim().is_empty() {
            return Err(FormatRejection::Empty);
        }
        if let Some(found) = self.forbidden.find(text) {
            return Err(FormatRejection::ForbiddenPunctuation(found.as_str().to_string()));
        }
        let words = text.split_whitespace().count();
        if words > self.max_words {
            return Err(FormatRejection::TooVerbose {
                words,
                max_words: self.max_words,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates() {
        let fact = Fact::new("7x8", "7 × 8", "56");
        let question = QuestionFormatter::new("question", 24).unwrap();
        assert_eq!(question.format(&fact).unwrap(), "7 × 8 = ?");

        let equation = QuestionFormatter::new("equation", 24).unwrap();
        assert_eq!(equation.format(&fact).unwrap(), "What is 7 × 8?");
    }

    #[test]
    fn test_unknown_template() {
        let err = QuestionFormatter::new("haiku", 24).err().unwrap();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(!is_known_template("haiku"));
    }

    #[test]
    fn test_rejects_forbidden_punctuation() {
        let formatter = QuestionFormatter::new("plain", 24).unwrap();
        assert!(matches!(
            formatter.format(&Fact::new("a", "7 × 8; 8 × 7", "56")),
            Err(FormatRejection::ForbiddenPunctuation(_))
        ));
        assert!(matches!(
            formatter.format(&Fact::new("b", "really?!", "x")),
            Err(FormatRejection::ForbiddenPunctuation(_))
        ));
        assert!(matches!(
            formatter.format(&Fact::new("c", "  ", "x")),
            Err(FormatRejection::Empty)
        ));
    }

    #[test]
    fn test_rejects_verbose_text() {
        let formatter = QuestionFormatter::new("plain", 3).unwrap();
        let rejection = formatter
            .format(&Fact::new("a", "one two three four", "x"))
            .unwrap_err();
        assert_eq!(
            rejection,
            FormatRejection::TooVerbose {
                words: 4,
                max_words: 3
            }
        );
    }
}
