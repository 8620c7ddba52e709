//! In-process answer producer.
//!
//! Classifies the question into a [`Topic`] and emits a scripted search →
//! results → crawl → final sequence in the legacy wire shape, with the final
//! answer JSON-encoded inside the `answer` field.

use std::time::Duration;

use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::stream::frame::DONE_SENTINEL;

use super::{ByteStream, Upstream};

/// Question category driving the scripted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Programming,
    Person,
    Concept,
    Country,
    General,
}

impl Topic {
    /// Classify a question by keyword.
    pub fn classify(question: &str) -> Self {
        let q = question.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| q.contains(w));

        if any(&[
            "programming", "language", "developer", "coding", "javascript", "python", "react",
            "node", "rust",
        ]) {
            Self::Programming
        } else if any(&["who is", "tell me about", "biography"]) {
            Self::Person
        } else if any(&[
            "what is", "explain", "quantum", "blockchain", "machine learning", "technology",
        ]) {
            Self::Concept
        } else if q.contains("about") && any(&["india", "usa", "japan", "country", "nation"]) {
            Self::Country
        } else {
            Self::General
        }
    }

    /// `(name, url, snippet)` search hits for this topic.
    fn search_results(self) -> &'static [(&'static str, &'static str, &'static str)] {
        match self {
            Self::Programming => &[
                ("Stack Overflow", "https://stackoverflow.com", "Programming community Q&A platform"),
                ("GitHub", "https://github.com", "Code repositories and open source projects"),
                ("MDN Web Docs", "https://developer.mozilla.org", "Web development documentation"),
                ("freeCodeCamp", "https://freecodecamp.org", "Learn to code for free"),
            ],
            Self::Person => &[
                ("Wikipedia", "https://wikipedia.org", "Free online encyclopedia"),
                ("Biography.com", "https://biography.com", "Famous people biographies"),
                ("IMDb", "https://imdb.com", "Internet Movie Database"),
                ("Britannica", "https://britannica.com", "Encyclopedia Britannica"),
            ],
            Self::Concept => &[
                ("TechCrunch", "https://techcrunch.com", "Technology news and analysis"),
                ("Wired", "https://wired.com", "Technology, science, and culture"),
                ("MIT Technology Review", "https://technologyreview.com", "Emerging technology insights"),
                ("IEEE Spectrum", "https://spectrum.ieee.org", "Engineering and technology news"),
            ],
            Self::Country => &[
                ("Encyclopedia Britannica", "https://britannica.com", "Comprehensive country information"),
                ("World Bank", "https://worldbank.org", "Economic and development data"),
                ("CIA World Factbook", "https://cia.gov/factbook", "Country profiles and statistics"),
                ("UN Data", "https://data.un.org", "United Nations country data"),
            ],
            Self::General => &[
                ("Wikipedia", "https://wikipedia.org", "Free online encyclopedia"),
                ("Britannica", "https://britannica.com", "Encyclopedia Britannica"),
                ("Google Scholar", "https://scholar.google.com", "Academic research papers"),
                ("Research Portal", "https://example.com", "Research and information hub"),
            ],
        }
    }

    fn answer(self, question: &str) -> String {
        match self {
            Self::Programming => format!(
                "Here's a practical overview of {question}:\n\n\
                 **Widely used languages:**\n\n\
                 1. **JavaScript** - web front ends and Node.js services\n\
                 2. **Python** - data science, automation and machine learning\n\
                 3. **TypeScript** - JavaScript with static types for large codebases\n\
                 4. **Go** - small, fast network services\n\
                 5. **Rust** - memory-safe systems programming\n\n\
                 **Skills that carry across languages:**\n\
                 • Version control with Git\n\
                 • Testing and debugging\n\
                 • API design and integration\n\n\
                 Pick the language that matches the problem, then invest in the shared skills."
            ),
            Self::Person => {
                let name = strip_phrases(question, &["who is", "tell me about"]);
                format!(
                    "**Biography of {name}**\n\n\
                     {name} is widely known for contributions in their field.\n\n\
                     **Career Highlights:**\n\
                     • A breakthrough that established their reputation\n\
                     • Recognition from peers and institutions\n\
                     • Continued leadership in their domain\n\n\
                     {name} remains an influential figure today."
                )
            }
            Self::Concept => {
                let concept = strip_phrases(question, &["what is", "explain"]);
                format!(
                    "**Understanding {concept}**\n\n\
                     {concept} is an approach that tackles familiar problems with new methods.\n\n\
                     **Key Features:**\n\
                     • **Scalability** - handles growing workloads\n\
                     • **Security** - protects data integrity\n\
                     • **Performance** - makes efficient use of resources\n\n\
                     **Applications:** healthcare, finance, logistics and research."
                )
            }
            Self::Country => {
                let place = strip_phrases(question, &["tell me about", "about"]);
                format!(
                    "**{place} - Country Overview**\n\n\
                     {place} has a rich history, a diverse culture and real global influence.\n\n\
                     **Economy:** technology, manufacturing, services and agriculture.\n\
                     **Culture:** many languages, traditions and regional identities.\n\
                     **Government:** active in international organizations and diplomacy."
                )
            }
            Self::General => format!(
                "**Answer to: \"{question}\"**\n\n\
                 **Overview:**\n\
                 This topic has several connected parts worth looking at separately.\n\n\
                 **Key Points:**\n\
                 • **Context** - the background and why it matters\n\
                 • **Current State** - recent developments\n\
                 • **Implications** - likely impact going forward\n\n\
                 Staying current with new developments keeps this picture accurate."
            ),
        }
    }
}

fn strip_phrases(question: &str, phrases: &[&str]) -> String {
    // Phrases are ASCII, so ASCII folding keeps byte offsets aligned with `out`.
    let mut out = question.to_string();
    for phrase in phrases {
        let lower = out.to_ascii_lowercase();
        if let Some(pos) = lower.find(phrase) {
            out.replace_range(pos..pos + phrase.len(), "");
        }
    }
    let trimmed = out.trim().trim_end_matches('?').trim();
    if trimmed.is_empty() {
        question.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Scripted in-process producer.
#[derive(Debug, Clone, Default)]
pub struct MockProducer {
    step_delay: Duration,
}

impl MockProducer {
    /// Create a producer pausing `step_delay` between records.
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    /// The records emitted for `question`, in order.
    pub fn records(&self, question: &str) -> Vec<Value> {
        let topic = Topic::classify(question);
        let results = topic.search_results();

        let web_results: Vec<Value> = results
            .iter()
            .map(|(name, url, snippet)| json!({ "name": name, "url": url, "snippet": snippet }))
            .collect();

        let sources: Vec<Value> = results
            .iter()
            .map(|(name, url, _)| {
                json!({
                    "title": name,
                    "url": url,
                    "snippet": format!("Learn more about {question} from {name}"),
                })
            })
            .collect();

        let final_doc = json!({ "answer": topic.answer(question), "web_results": sources });

        let mut records = vec![
            json!({ "step_type": "INITIAL_QUERY", "content": { "query": question }, "uuid": "" }),
            json!({
                "step_type": "SEARCH_WEB",
                "content": { "goal_id": "0", "queries": [{ "engine": "web", "query": question, "limit": 8 }] },
                "uuid": uuid::Uuid::new_v4().to_string(),
            }),
            json!({
                "step_type": "SEARCH_RESULTS",
                "content": { "goal_id": "0", "web_results": web_results },
                "uuid": uuid::Uuid::new_v4().to_string(),
            }),
        ];
        records.extend(results.iter().map(|(_, url, _)| {
            json!({ "step_type": "URL_CRAWL_UPDATE", "content": { "url": url } })
        }));
        records.push(json!({
            "step_type": "FINAL",
            "content": { "answer": final_doc.to_string() },
            "uuid": "",
        }));
        records
    }

    /// The complete wire text for `question`, including the end sentinel.
    pub fn wire(&self, question: &str) -> String {
        let mut out: String = self
            .records(question)
            .iter()
            .map(|r| format!("data: {r}\n\n"))
            .collect();
        out.push_str(&format!("data: {DONE_SENTINEL}\n\n"));
        out
    }
}

#[async_trait::async_trait]
impl Upstream for MockProducer {
    async fn open(&self, question: &str) -> Result<ByteStream> {
        let records = self.records(question);
        let delay = self.step_delay;

        let out = async_stream::stream! {
            for (idx, record) in records.iter().enumerate() {
                if idx > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok::<_, Error>(format!("data: {record}\n\n").into_bytes());
            }
            yield Ok::<_, Error>(format!("data: {DONE_SENTINEL}\n\n").into_bytes());
        };
        Ok(Box::pin(out))
    }
}
