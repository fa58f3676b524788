//! Local sensitive-term prescreen.
//!
//! A comment that matches nothing here is published without ever
//! touching the quota or the AI endpoint; only comments that already
//! look risky are worth an external call.

/// Fixed lexicon, grouped by category. Matching is case-insensitive
/// substring containment, so short latin entries like "sb" also catch
/// embedded occurrences.
static SENSITIVE_TERMS: &[&str] = &[
    // 脏话/辱骂
    "傻逼", "sb", "操", "草", "妈", "爸", "日", "艹", "fuck", "shit", "damn",
    "狗", "猪", "蠢", "白痴", "弱智", "智障", "脑残", "废物", "垃圾", "滚",
    "死", "杀", "打", "揍",
    // 色情
    "性", "裸", "色情", "约炮", "一夜情", "援交",
    // 广告/引流
    "加微信", "加qq", "加v", "威信", "薇信", "私聊", "优惠", "免费领",
    "点击链接", "http://", "https://", ".com", ".cn", ".top",
    // 政治敏感（简化）
    "政府", "领导", "官员",
];

/// True when the text contains at least one lexicon term. Stops at the
/// first hit.
pub fn contains_sensitive_term(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SENSITIVE_TERMS
        .iter()
        .any(|term| lowered.contains(&term.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::contains_sensitive_term;

    #[test]
    fn clean_comment_passes() {
        assert!(!contains_sensitive_term("nice post, thanks!"));
        assert!(!contains_sensitive_term("写得真好，学到了很多"));
        assert!(!contains_sensitive_term(""));
    }

    #[test]
    fn profanity_matches_case_insensitively() {
        assert!(contains_sensitive_term("this is SHIT"));
        assert!(contains_sensitive_term("Fuck this"));
        assert!(contains_sensitive_term("你是傻逼吗"));
    }

    #[test]
    fn spam_and_urls_match() {
        assert!(contains_sensitive_term("加微信0000 优惠"));
        assert!(contains_sensitive_term("visit https://example.org now"));
        assert!(contains_sensitive_term("去 example.com 免费领"));
    }

    #[test]
    fn political_terms_match() {
        assert!(contains_sensitive_term("政府应该管管"));
    }
}
