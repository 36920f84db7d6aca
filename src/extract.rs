/// Signal extraction
///
/// Pulls structured fields out of post text with a fixed set of regexes and
/// scores how actionable a post looks for airdrop/crypto content.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

lazy_static! {
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").expect("invalid url regex");
    static ref HASHTAG_RE: Regex = Regex::new(r"#[A-Za-z0-9_]+").expect("invalid hashtag regex");
    static ref MENTION_RE: Regex = Regex::new(r"@[A-Za-z0-9_]+").expect("invalid mention regex");
    // Word, digit and boundary classes are ASCII-only below
    static ref DATE_RE: Regex = Regex::new(
        r"(?i-u)\b(\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}|\d{4}[/\-]\d{1,2}[/\-]\d{1,2}|Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\b"
    )
    .expect("invalid date regex");
    static ref TOKEN_RE: Regex = Regex::new(r"(?-u)\$[A-Z]{2,10}\b").expect("invalid token regex");
    static ref PRICE_RE: Regex = Regex::new(r"(?-u)\$[\d,]+\.?\d*").expect("invalid price regex");
    static ref REQUIREMENT_RES: Vec<Regex> = [
        r"(?i-u)hold \d+",
        r"(?i-u)minimum \d+",
        r"(?i-u)before \w+",
        r"(?i-u)deadline",
        r"(?i-u)register",
        r"(?i-u)connect wallet",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid requirement regex"))
    .collect();
}

/// Words that mark a post as an airdrop opportunity
const AIRDROP_KEYWORDS: [&str; 8] = [
    "airdrop",
    "claim",
    "snapshot",
    "eligible",
    "whitelist",
    "testnet",
    "mainnet",
    "retroactive",
];

/// Broader vocabulary accepted by the rewrite endpoint
const CRYPTO_KEYWORDS: [&str; 16] = [
    "airdrop",
    "free tokens",
    "claim",
    "snapshot",
    "distribution",
    "testnet",
    "mainnet",
    "retroactive",
    "eligible",
    "whitelist",
    "bitcoin",
    "ethereum",
    "defi",
    "nft",
    "web3",
    "dao",
];

const SUMMARY_TOP_N: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extracted {
    pub urls: Vec<String>,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub dates: Vec<String>,
    pub tokens: Vec<String>,
    pub prices: Vec<String>,
    pub requirements: Vec<String>,
    pub keywords: Vec<String>,
}

fn all_matches(re: &Regex, text: &str) -> Vec<String> {
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Run every pattern over `text`
pub fn extract(text: &str) -> Extracted {
    let lower = text.to_lowercase();

    Extracted {
        urls: all_matches(&URL_RE, text),
        hashtags: all_matches(&HASHTAG_RE, text),
        mentions: all_matches(&MENTION_RE, text),
        dates: all_matches(&DATE_RE, text),
        tokens: all_matches(&TOKEN_RE, text),
        prices: all_matches(&PRICE_RE, text),
        requirements: REQUIREMENT_RES
            .iter()
            .flat_map(|re| all_matches(re, text))
            .collect(),
        keywords: AIRDROP_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .map(|k| k.to_string())
            .collect(),
    }
}

/// Weighted sum of match counts
pub fn relevance_score(extracted: &Extracted) -> usize {
    extracted.keywords.len() * 3
        + extracted.urls.len() * 2
        + extracted.dates.len() * 2
        + extracted.tokens.len()
        + extracted.requirements.len() * 2
}

pub fn is_crypto_post(text: &str) -> bool {
    let lower = text.to_lowercase();
    CRYPTO_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCount {
    pub term: String,
    pub count: usize,
}

/// Aggregate view over a batch of analyzed posts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub top_tokens: Vec<TermCount>,
    pub common_keywords: Vec<TermCount>,
    pub urgent_dates: Vec<String>,
    pub top_urls: Vec<String>,
    pub requirements: Vec<String>,
}

/// Count terms keeping first-seen order, then keep the `n` most frequent.
/// Ties stay in first-seen order.
fn top_terms<'a>(terms: impl Iterator<Item = &'a String>, n: usize) -> Vec<TermCount> {
    let mut order: Vec<TermCount> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for term in terms {
        match index.get(term.as_str()) {
            Some(&i) => order[i].count += 1,
            None => {
                index.insert(term.as_str(), order.len());
                order.push(TermCount {
                    term: term.clone(),
                    count: 1,
                });
            }
        }
    }

    order.sort_by(|a, b| b.count.cmp(&a.count));
    order.truncate(n);
    order
}

pub fn summarize<'a>(batch: impl IntoIterator<Item = &'a Extracted>) -> Summary {
    let items: Vec<&Extracted> = batch.into_iter().collect();

    Summary {
        top_tokens: top_terms(items.iter().flat_map(|e| e.tokens.iter()), SUMMARY_TOP_N),
        common_keywords: top_terms(items.iter().flat_map(|e| e.keywords.iter()), SUMMARY_TOP_N),
        urgent_dates: items.iter().flat_map(|e| e.dates.iter().cloned()).collect(),
        top_urls: items.iter().flat_map(|e| e.urls.iter().cloned()).collect(),
        requirements: items
            .iter()
            .flat_map(|e| e.requirements.iter().cloned())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AIRDROP: &str = "Huge $ARB airdrop! Snapshot on 12/05/2024, claim at https://arb.foundation/claim \
        before Friday. Hold 100 tokens and connect wallet to register. #Arbitrum @arbitrum";

    #[test]
    fn extracts_each_field() {
        let e = extract(AIRDROP);

        assert_eq!(e.urls, vec!["https://arb.foundation/claim"]);
        assert_eq!(e.hashtags, vec!["#Arbitrum"]);
        assert_eq!(e.mentions, vec!["@arbitrum"]);
        assert_eq!(e.dates, vec!["12/05/2024"]);
        assert_eq!(e.tokens, vec!["$ARB"]);
        assert_eq!(e.keywords, vec!["airdrop", "claim", "snapshot"]);
        assert_eq!(
            e.requirements,
            vec!["Hold 100", "before Friday", "register", "connect wallet"]
        );
    }

    #[test]
    fn score_weights_matches() {
        let e = extract(AIRDROP);
        // 3 keywords*3 + 1 url*2 + 1 date*2 + 1 token + 4 requirements*2
        assert_eq!(relevance_score(&e), 9 + 2 + 2 + 1 + 8);
    }

    #[test]
    fn plain_text_scores_zero() {
        let e = extract("good morning everyone, coffee time");
        assert_eq!(e, Extracted::default());
        assert_eq!(relevance_score(&e), 0);
    }

    #[test]
    fn month_names_need_word_boundaries() {
        let e = extract("Mainnet in Dec, testnet since mar 3; Junior devs welcome");
        assert_eq!(e.dates, vec!["Dec", "mar"]);
    }

    #[test]
    fn iso_dates_match() {
        let e = extract("deadline 2024-06-30 or 6-30-24");
        assert_eq!(e.dates, vec!["2024-06-30", "6-30-24"]);
        assert_eq!(e.requirements, vec!["deadline"]);
    }

    #[test]
    fn tokens_are_uppercase_only() {
        let e = extract("$eth is not a ticker but $ETH and $SOL are; $X is too short");
        assert_eq!(e.tokens, vec!["$ETH", "$SOL"]);
    }

    #[test]
    fn character_classes_stay_ascii() {
        let e = extract("$\u{663}\u{660}\u{660} off, $ETH\u{e9} pump, claim before M\u{e4}rz, regi\u{17f}ter now");
        assert!(e.prices.is_empty());
        assert_eq!(e.tokens, vec!["$ETH"]);
        assert_eq!(e.requirements, vec!["before M"]);
    }

    #[test]
    fn prices_include_separators() {
        let e = extract("BTC at $64,250.75 and fees of $3");
        assert_eq!(e.prices, vec!["$64,250.75", "$3"]);
    }

    #[test]
    fn crypto_detection_is_case_insensitive() {
        assert!(is_crypto_post("New NFT drop tonight"));
        assert!(is_crypto_post("Bitcoin ETF news"));
        assert!(!is_crypto_post("Lunch at noon"));
    }

    #[test]
    fn summary_counts_and_ranks() {
        let a = extract("$SOL airdrop claim");
        let b = extract("$ETH $SOL airdrop https://x.io");
        let c = extract("$ETH $SOL snapshot 1/2/2025");

        let summary = summarize([&a, &b, &c]);
        assert_eq!(
            summary.top_tokens,
            vec![
                TermCount { term: "$SOL".into(), count: 3 },
                TermCount { term: "$ETH".into(), count: 2 },
            ]
        );
        assert_eq!(summary.common_keywords[0], TermCount { term: "airdrop".into(), count: 2 });
        assert_eq!(summary.top_urls, vec!["https://x.io"]);
        assert_eq!(summary.urgent_dates, vec!["1/2/2025"]);
    }

    #[test]
    fn summary_keeps_top_five() {
        let e = extract("$AA $BB $CC $DD $EE $FF $GG");
        let summary = summarize([&e]);
        assert_eq!(summary.top_tokens.len(), 5);
        assert_eq!(summary.top_tokens[0].term, "$AA");
    }
}
