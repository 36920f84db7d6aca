/// Prompt templates
///
/// The crypto thread catalogue and the builders for single-tweet generation
/// and rewrites.

use serde::Serialize;

use crate::models::Category;

/// Placeholder replaced by the gathered context in every thread template
pub const CONTEXT_PLACEHOLDER: &str = "{contextData}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadTemplate {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

impl ThreadTemplate {
    pub fn render(&self, context: &str) -> String {
        self.prompt.replacen(CONTEXT_PLACEHOLDER, context, 1)
    }
}

macro_rules! thread_prompt {
    ($intro:literal, $language:literal, $style:literal, $structure:literal, $closing:literal) => {
        concat!(
            $intro,
            "\n\nLANGUAGE REQUIREMENTS:\n",
            "- Use SIMPLE, CLEAR English for an audience of non-native speakers new to crypto\n",
            $language,
            "\n\nTHREAD FORMAT:\n",
            "- Write EXACTLY 3-4 separate tweets\n",
            "- Each tweet is 200-280 characters\n",
            "- Label them \"Tweet 1/4:\", \"Tweet 2/4:\" and so on\n",
            "- Put the 🧵 emoji in the first tweet only\n",
            "- Every tweet must stand alone as a complete thought\n",
            "\nSTYLE:\n",
            $style,
            "\n\nSTRUCTURE:\n",
            $structure,
            "\n\nCONTEXT DATA:\n{contextData}\n\n",
            $closing
        )
    };
}

pub static THREAD_TEMPLATES: [ThreadTemplate; 7] = [
    ThreadTemplate {
        id: "alpha_airdrop",
        title: "Alpha/Airdrop/Monetization Threads",
        description: "Actionable guides for earning crypto and getting early access",
        prompt: thread_prompt!(
            "Write a crypto Twitter thread about an airdrop or earning opportunity for crypto newcomers.",
            "- Talk like you would to a friend, using \"you\" and \"your\"\n- Explain any technical term in brackets",
            "- Open with a relatable hook such as \"If you missed...\" or \"New to crypto?\"\n- Give reward amounts in plain terms\n- Number the steps\n- Prefer \"opportunity\" over \"alpha\" and \"do your research\" over \"DYOR\"\n- Bold key names, tokens and numbers with **text**",
            "Tweet 1/4: hook + the opportunity + 🧵\nTweet 2/4: what the project does and why it matters\nTweet 3/4: numbered step-by-step instructions\nTweet 4/4: how to start + \"Not financial advice\"",
            "Explain it the way you would to someone who just bought their first coin."
        ),
    },
    ThreadTemplate {
        id: "deep_dive",
        title: "Deep Dive/Token Utility/Product Breakdown",
        description: "Educational threads explaining complex projects and technology",
        prompt: thread_prompt!(
            "Write an educational crypto Twitter thread that breaks down one project for crypto newcomers.",
            "- Replace jargon with everyday words\n- Compare ideas to familiar things",
            "- Open with \"Let me explain [project] in simple words\"\n- Use analogies like \"Think of it like...\"\n- Describe benefits concretely\n- Bold key terms with **text**",
            "Tweet 1/4: what the project is + why you should care + 🧵\nTweet 2/4: how it works, with an analogy\nTweet 3/4: what makes it different for users\nTweet 4/4: why it matters next + \"Not financial advice\"",
            "Teach it like a patient friend would."
        ),
    },
    ThreadTemplate {
        id: "meta_commentary",
        title: "Platform/Meta Commentary & Strategy",
        description: "Industry observations, platform strategy and hot takes",
        prompt: thread_prompt!(
            "Write a crypto industry commentary thread for crypto newcomers.",
            "- Keep industry terms to a minimum\n- Use examples from everyday life",
            "- Open with an observation such as \"I noticed something...\"\n- Turn the insight into clear action\n- Bold key points with **text**",
            "Tweet 1/4: the observation + why it matters + 🧵\nTweet 2/4: what most people miss\nTweet 3/4: what to do about it\nTweet 4/4: closing advice + \"Not financial advice\"",
            "Share it the way you would tell a friend over tea."
        ),
    },
    ThreadTemplate {
        id: "market_ta",
        title: "Real-Time Market & TA Commentary",
        description: "Chart reading and market sentiment for the major coins",
        prompt: thread_prompt!(
            "Write a market analysis crypto thread for crypto newcomers.",
            "- Explain trading terms in plain words\n- Skip advanced technical-analysis vocabulary",
            "- Open with \"Here's what I'm seeing in the market...\"\n- Stick to basic support and resistance\n- Bold key price levels with **text**",
            "Tweet 1/4: the market right now + 🧵\nTweet 2/4: price levels to watch\nTweet 3/4: what it means for traders\nTweet 4/4: risk management + \"Not financial advice\"",
            "Explain the moves for someone who is learning to trade."
        ),
    },
    ThreadTemplate {
        id: "humor_memes",
        title: "Hyper-Relatable Humor & Memes",
        description: "Crypto humor riding current trends and drama",
        prompt: thread_prompt!(
            "Write a funny crypto thread that newcomers can relate to.",
            "- Keep jokes universal, no insider references",
            "- Start from a situation everyone has lived through\n- Keep it light\n- Bold the punchlines with **text**",
            "Tweet 1/4: the relatable setup + 🧵\nTweet 2/4: the funny reality\nTweet 3/4: one more relatable moment\nTweet 4/4: punchline + invite replies",
            "Anyone who is new to crypto should get the joke."
        ),
    },
    ThreadTemplate {
        id: "community_polls",
        title: "Interactive Community Polls",
        description: "Polls on predictions and divisive opinions",
        prompt: thread_prompt!(
            "Write an interactive crypto poll thread for crypto newcomers.",
            "- Phrase the question simply\n- Make every option easy to understand",
            "- Open with \"I want to know what you think...\"\n- Offer options A/B/C/D\n- Bold the options with **text**",
            "Tweet 1/4: context + why the question matters + 🧵\nTweet 2/4: the poll question with options A/B/C/D\nTweet 3/4: each option explained\nTweet 4/4: ask people to vote and discuss",
            "Ask something a newcomer can form an opinion on."
        ),
    },
    ThreadTemplate {
        id: "quote_tweet",
        title: "Quote Tweet to Earn (Viral Outreach)",
        description: "Thought-provoking posts made for quote tweets",
        prompt: thread_prompt!(
            "Write a crypto thread built to be quote-tweeted, aimed at crypto newcomers.",
            "- Ask questions people can relate to\n- Make each statement easy to repeat",
            "- Open with a simple but surprising statement\n- Use real-life examples\n- Bold key statements with **text**",
            "Tweet 1/4: the statement + 🧵\nTweet 2/4: a question that makes people think\nTweet 3/4: the different sides, explained simply\nTweet 4/4: final question + \"Quote tweet with your answer\"",
            "Make it easy to understand and hard not to answer."
        ),
    },
];

pub fn thread_template(id: &str) -> Option<&'static ThreadTemplate> {
    THREAD_TEMPLATES.iter().find(|t| t.id == id)
}

/// Single tweet on a topic; used with model fallback
pub fn tweet_prompt(niche: &str, sub_category: &str, user_info: Option<&str>) -> String {
    let user_context = user_info
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("User context: {} ", s))
        .unwrap_or_default();
    format!(
        "Create a {} tweet about {}. {}Make it engaging, informative, and under 280 characters. Include relevant hashtags.",
        niche, sub_category, user_context
    )
}

/// Single tweet with optional gathered context appended
pub fn enhanced_tweet_prompt(
    niche: &str,
    sub_category: &str,
    user_info: Option<&str>,
    context: &str,
) -> String {
    let mut prompt = format!(
        "Create a {} tweet about {}.\n\nRequirements:\n\
        - Under 280 characters\n\
        - Engaging and informative\n\
        - Include 2-3 relevant hashtags\n\
        - Professional tone\n",
        niche, sub_category
    );
    if let Some(info) = user_info.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("- User context: {}\n", info));
    }
    prompt.push_str(context);
    prompt.push_str("\n\nGenerate only the tweet text, no explanations.");
    prompt
}

pub fn rewrite_prompt(original: &str, category: Option<Category>) -> String {
    let voice = category
        .map(|c| c.voice())
        .unwrap_or("crypto enthusiast");
    format!(
        "Rewrite this tweet from a {}: \"{}\"\n\n\
        Requirements:\n\
        - Keep the core message and any important details (dates, requirements, links)\n\
        - Make it sound natural and engaging\n\
        - Under 280 characters\n\
        - Maintain crypto/airdrop context\n\
        - Don't just copy - rewrite in a fresh way\n\
        - Include relevant hashtags if appropriate",
        voice, original
    )
}

pub fn enhanced_rewrite_prompt(original: &str, category: Option<Category>) -> String {
    let tag = category.map(|c| c.as_str()).unwrap_or("crypto");
    format!(
        "Rewrite this {} tweet in a fresh way:\n\"{}\"\n\n\
        Keep:\n\
        - Core message and facts\n\
        - Important dates/links\n\
        - Crypto/airdrop context\n\n\
        Make it:\n\
        - Natural and engaging\n\
        - Under 280 characters\n\
        - Your own voice\n\n\
        Output only the rewritten tweet.",
        tag, original
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_template_has_one_placeholder() {
        for t in THREAD_TEMPLATES.iter() {
            assert_eq!(t.prompt.matches(CONTEXT_PLACEHOLDER).count(), 1, "{}", t.id);
        }
    }

    #[test]
    fn template_ids_are_unique() {
        let ids: HashSet<_> = THREAD_TEMPLATES.iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), THREAD_TEMPLATES.len());
        assert!(thread_template("market_ta").is_some());
        assert!(thread_template("shitpost").is_none());
    }

    #[test]
    fn render_substitutes_context() {
        let t = thread_template("deep_dive").unwrap();
        let rendered = t.render("BTC at 64k");
        assert!(rendered.contains("CONTEXT DATA:\nBTC at 64k\n"));
        assert!(!rendered.contains(CONTEXT_PLACEHOLDER));
    }

    #[test]
    fn tweet_prompt_mentions_user_context_only_when_given() {
        let with = tweet_prompt("crypto", "staking", Some("I run a validator"));
        assert!(with.starts_with("Create a crypto tweet about staking. User context: I run a validator Make it"));

        let without = tweet_prompt("crypto", "staking", None);
        assert_eq!(
            without,
            "Create a crypto tweet about staking. Make it engaging, informative, and under 280 characters. Include relevant hashtags."
        );
    }

    #[test]
    fn rewrite_prompts_pick_voice() {
        assert!(rewrite_prompt("gm", Some(Category::Company))
            .contains("crypto company making official announcements"));
        assert!(rewrite_prompt("gm", None).contains("from a crypto enthusiast"));
        assert!(enhanced_rewrite_prompt("gm", Some(Category::Influencer))
            .starts_with("Rewrite this influencer tweet"));
    }

    #[test]
    fn enhanced_prompt_appends_context() {
        let p = enhanced_tweet_prompt("crypto", "L2s", None, "\n\nCurrent Market Context (1/1/2024):\n");
        assert!(p.contains("- Professional tone\n\n\nCurrent Market Context"));
        assert!(p.ends_with("Generate only the tweet text, no explanations."));
    }
}
