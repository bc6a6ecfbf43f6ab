//! Question answering on top of the retriever.
//!
//! The language model and the web search backend are external
//! collaborators behind the [`Answerer`] and [`WebSearch`] traits. The
//! [`Assistant`] decides what context they get:
//!
//! 1. Local retrieval, with the species prepended to the query when one is
//!    selected.
//! 2. If local retrieval returns fewer than `web_fallback_threshold` hits
//!    and a [`WebSearch`] is attached, up to `web_context_limit` web
//!    snippets are appended. A failing web search contributes nothing.
//! 3. The [`Prompt`] built from both goes to the [`Answerer`], whose reply
//!    is [`condense`]d in concise mode.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::retriever::Retriever;

const BASE_SYSTEM_MESSAGE: &str =
    "You are a helpful pet care assistant providing accurate information about pets.";

/// Words that already make a query pet-specific for web search.
const PET_TERMS: &[&str] = &["pet", "dog", "cat", "animal"];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Concise,
    Detailed,
}

impl ResponseMode {
    fn instruction(self) -> &'static str {
        match self {
            ResponseMode::Concise => "Keep your responses brief and to the point.",
            ResponseMode::Detailed => "Provide detailed and comprehensive responses.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl WebResult {
    /// `From {title} ({url}):\n{snippet}`
    pub fn to_context(&self) -> String {
        format!("From {} ({}):\n{}", self.title, self.url, self.snippet)
    }
}

/// Everything an [`Answerer`] needs for one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub query: String,
    pub context: Vec<String>,
    pub mode: ResponseMode,
    pub system_message: String,
}

impl Prompt {
    /// The numbered context block, or `None` when there is no context.
    pub fn context_block(&self) -> Option<String> {
        if self.context.is_empty() {
            return None;
        }
        let mut block = String::from("Here's relevant information to help answer the question:\n");
        for (i, snippet) in self.context.iter().enumerate() {
            block.push_str(&format!("{}. {}\n", i + 1, snippet));
        }
        Some(block)
    }
}

/// Language model capability: turns a prompt into answer text.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, prompt: &Prompt) -> Result<String>;
}

/// Web search capability returning ranked snippets.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>>;
}

/// Build the prompt for `query` with the given context.
pub fn build_prompt(
    query: &str,
    context: Vec<String>,
    mode: ResponseMode,
    species: Option<&str>,
) -> Prompt {
    let mut system_message = BASE_SYSTEM_MESSAGE.to_string();
    if let Some(species) = species {
        system_message.push_str(&format!(
            " The user is specifically asking about {}, so focus your response on that species.",
            species
        ));
    }
    system_message.push(' ');
    system_message.push_str(mode.instruction());

    Prompt {
        query: query.to_string(),
        context,
        mode,
        system_message,
    }
}

/// Prefix `pet care ` unless the query already mentions a pet term.
pub fn web_query(query: &str) -> String {
    let lower = query.to_lowercase();
    if PET_TERMS.iter().any(|term| lower.contains(term)) {
        query.to_string()
    } else {
        format!("pet care {}", query)
    }
}

/// Shorten `text` to its first three sentences in concise mode.
///
/// Sentences are split on `". "`. Text with three or fewer sentences, and
/// any text in detailed mode, is returned unchanged.
pub fn condense(text: &str, mode: ResponseMode) -> String {
    if mode == ResponseMode::Detailed {
        return text.to_string();
    }
    let sentences: Vec<&str> = text.split(". ").collect();
    if sentences.len() <= 3 {
        return text.to_string();
    }
    format!("{}.", sentences[..3].join(". "))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub local_hits: usize,
    pub web_snippets: usize,
}

pub struct Assistant<'a> {
    retriever: &'a Retriever,
    answerer: &'a dyn Answerer,
    web: Option<&'a dyn WebSearch>,
    settings: RetrievalConfig,
}

impl<'a> Assistant<'a> {
    pub fn new(retriever: &'a Retriever, answerer: &'a dyn Answerer, settings: RetrievalConfig) -> Self {
        Self {
            retriever,
            answerer,
            web: None,
            settings,
        }
    }

    pub fn with_web_search(mut self, web: &'a dyn WebSearch) -> Self {
        self.web = Some(web);
        self
    }

    /// Answer `query`, optionally focused on one species.
    ///
    /// Retrieval and answerer errors propagate; web search errors do not.
    pub async fn respond(&self, query: &str, mode: ResponseMode, species: Option<&str>) -> Result<Reply> {
        let search_query = match species {
            Some(species) => format!("{} {}", species, query),
            None => query.to_string(),
        };

        let hits = self
            .retriever
            .query(&search_query, self.settings.top_k)
            .await?;
        let local_hits = hits.len();
        let mut context: Vec<String> = hits.iter().map(ToString::to_string).collect();

        let mut web_snippets = 0;
        if let Some(web) = self.web {
            if local_hits < self.settings.web_fallback_threshold {
                let snippets = self.web_context(web, &search_query).await;
                web_snippets = snippets.len();
                context.extend(snippets);
            }
        }
        debug!(local_hits, web_snippets, "Assembled answer context");

        let prompt = build_prompt(query, context, mode, species);
        let answer = self.answerer.answer(&prompt).await?;

        Ok(Reply {
            text: condense(&answer, mode),
            local_hits,
            web_snippets,
        })
    }

    async fn web_context(&self, web: &dyn WebSearch, query: &str) -> Vec<String> {
        let query = web_query(query);
        match web.search(&query, self.settings.web_max_results).await {
            Ok(results) => results
                .iter()
                .take(self.settings.web_context_limit)
                .filter(|r| !r.snippet.is_empty())
                .map(WebResult::to_context)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Web search failed; continuing without web context");
                Vec::new()
            }
        }
    }
}
