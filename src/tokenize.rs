use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A whole emoji grapheme cluster, drawn as one bitmap.
    Emoji,
    Cjk,
    Space,
    Separator,
    Word,
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub kind: TokenKind,
}

impl Token<'_> {
    /// Tokens after which a line may break.
    pub fn is_break_opportunity(&self) -> bool {
        !matches!(self.kind, TokenKind::Word)
    }
}

const SEPARATORS: &[char] = &[
    ',', '.', ':', ';', '!', '?', '，', '。', '：', '、', '！', '？', '；',
];

/// Splits text into break-atomic tokens. Adjacent Latin/digit graphemes merge
/// into one `Word`; everything else is a token of its own.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    for (offset, grapheme) in text.grapheme_indices(true) {
        let kind = classify(grapheme);
        if kind == TokenKind::Word {
            word_start.get_or_insert(offset);
            continue;
        }
        if let Some(start) = word_start.take() {
            tokens.push(Token {
                text: &text[start..offset],
                kind: TokenKind::Word,
            });
        }
        tokens.push(Token {
            text: grapheme,
            kind,
        });
    }
    if let Some(start) = word_start {
        tokens.push(Token {
            text: &text[start..],
            kind: TokenKind::Word,
        });
    }
    tokens
}

fn classify(grapheme: &str) -> TokenKind {
    let Some(first) = grapheme.chars().next() else {
        return TokenKind::Word;
    };
    if grapheme == "\n" || grapheme == "\r\n" {
        TokenKind::Newline
    } else if is_emoji_cluster(grapheme) {
        TokenKind::Emoji
    } else if first.is_whitespace() {
        TokenKind::Space
    } else if SEPARATORS.contains(&first) {
        TokenKind::Separator
    } else if is_cjk(first) {
        TokenKind::Cjk
    } else {
        TokenKind::Word
    }
}

pub fn is_emoji_cluster(grapheme: &str) -> bool {
    let mut chars = grapheme.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if is_emoji_presentation(first) {
        return true;
    }
    // Text-default symbols turned into emoji by VS16 or a keycap.
    grapheme.contains('\u{FE0F}') || grapheme.contains('\u{20E3}')
}

fn is_emoji_presentation(ch: char) -> bool {
    matches!(
        ch as u32,
        0x1F000..=0x1FAFF
            | 0x2600..=0x27BF
            | 0x231A..=0x231B
            | 0x23E9..=0x23F3
            | 0x23F8..=0x23FA
            | 0x2B05..=0x2B07
            | 0x2B1B..=0x2B1C
            | 0x2B50
            | 0x2B55
            | 0x3030
            | 0x303D
            | 0x3297
            | 0x3299
    )
}

pub fn starts_with_emoji(text: &str) -> bool {
    text.graphemes(true).next().is_some_and(is_emoji_cluster)
}

pub fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B820..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x3040..=0x30FF
            | 0xAC00..=0xD7AF
    )
}

/// Code points of an emoji cluster as used by emoji image sets: lowercase hex
/// joined by `-`, with VS16 dropped unless the cluster is a ZWJ sequence.
pub fn emoji_code(cluster: &str) -> String {
    let keep_vs16 = cluster.contains('\u{200D}');
    cluster
        .chars()
        .filter(|&c| keep_vs16 || c != '\u{FE0F}')
        .map(|c| format!("{:x}", c as u32))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(tokens: &[Token<'a>]) -> Vec<&'a str> {
        tokens.iter().map(|t| t.text).collect()
    }

    #[test]
    fn emoji_and_cjk_are_atomic() {
        let tokens = tokenize("😀你好");
        assert_eq!(texts(&tokens), vec!["😀", "你", "好"]);
        assert_eq!(tokens[0].kind, TokenKind::Emoji);
        assert_eq!(tokens[1].kind, TokenKind::Cjk);
    }

    #[test]
    fn latin_runs_merge_until_a_boundary() {
        let tokens = tokenize("hello world, rust2024!");
        assert_eq!(
            texts(&tokens),
            vec!["hello", " ", "world", ",", " ", "rust2024", "!"]
        );
        assert_eq!(tokens[1].kind, TokenKind::Space);
        assert_eq!(tokens[3].kind, TokenKind::Separator);
    }

    #[test]
    fn zwj_family_is_one_token() {
        let family = "👨\u{200D}👩\u{200D}👧";
        let line = format!("a{family}b");
        let tokens = tokenize(&line);
        assert_eq!(texts(&tokens), vec!["a", family, "b"]);
        assert_eq!(tokens[1].kind, TokenKind::Emoji);
    }

    #[test]
    fn full_width_punctuation_separates() {
        let tokens = tokenize("国内，要闻。");
        assert_eq!(texts(&tokens), vec!["国", "内", "，", "要", "闻", "。"]);
        assert_eq!(tokens[2].kind, TokenKind::Separator);
    }

    #[test]
    fn newlines_are_their_own_tokens() {
        let tokens = tokenize("a\nb");
        assert_eq!(tokens[1].kind, TokenKind::Newline);
    }

    #[test]
    fn emoji_codes_follow_image_set_naming() {
        assert_eq!(emoji_code("😀"), "1f600");
        assert_eq!(emoji_code("❤\u{FE0F}"), "2764");
        assert_eq!(emoji_code("🇨🇳"), "1f1e8-1f1f3");
        assert_eq!(
            emoji_code("🏳\u{FE0F}\u{200D}🌈"),
            "1f3f3-fe0f-200d-1f308"
        );
    }

    #[test]
    fn detects_leading_emoji() {
        assert!(starts_with_emoji("🔥 热点"));
        assert!(!starts_with_emoji("热点 🔥"));
        assert!(!starts_with_emoji(""));
    }
}
