//! Shop assistant: relays shopper messages to a hosted LLM, adding shop
//! policies and matching catalog entries to the system prompt.

mod client;

pub use client::{
    ChatMessage, ChatRole, CompletionClient, CompletionError, CompletionRequest,
    CompletionResponse, HttpCompletionClient, Usage,
};

use crate::{
    config::ChatConfig,
    errors::ServiceError,
    metrics,
    services::catalog::{CatalogService, ProductView},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const RATE_LIMITED_REPLY: &str = "Too many requests right now. Please wait a minute and try again.";
pub const FALLBACK_REPLY: &str = "Something went wrong on our side. Please try again later!";
const EMPTY_COMPLETION_REPLY: &str = "Sorry, I can't answer that right now. Please try again!";

const SHOP_KNOWLEDGE: &str = "\
You are the virtual assistant of a shoe shop. Answer customers using the information below.

## SHOP
- Sells sports shoes, sneakers, leather shoes and sandals
- Hotline: 0909 123 456 (8:00-22:00)

## SIZE GUIDE (EU size: foot length)
- 35: 22-22.5cm | 36: 22.5-23cm | 37: 23-23.5cm
- 38: 23.5-24cm | 39: 24-24.5cm | 40: 24.5-25cm
- 41: 25-25.5cm | 42: 25.5-26cm | 43: 26-26.5cm

## SHIPPING
- Hanoi / Ho Chi Minh City inner districts: 1-2 days, 30.000đ
- Other provinces: 3-5 days, 35.000đ
- Free shipping on orders from 500.000đ

## RETURNS
- Within 7 days of delivery, unworn, tags attached

## PAYMENT
- Cash on delivery, VNPay, MoMo, bank transfer

## HOW TO ANSWER
- For questions about specific products (name, price, sizes) rely on the PRODUCT LIST when present
- Be friendly and concise; reply in the customer's language
";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub usage: Option<Usage>,
}

/// Formats whole dong with dot thousands separators, e.g. `1.250.000đ`.
pub fn format_price(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{sign}{grouped}đ")
}

pub fn mentions_products(message: &str, keywords: &[String]) -> bool {
    let lowered = message.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
}

/// Distinct lowercase words of at least three characters.
pub fn search_terms(message: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

pub fn product_context(products: &[ProductView]) -> String {
    if products.is_empty() {
        return String::new();
    }
    let mut context = String::from("\n\n## PRODUCT LIST\n");
    for product in products {
        context.push_str(&format!("- {}: {}\n", product.name, format_price(product.price)));
        let sizes = product.in_stock_sizes();
        if !sizes.is_empty() {
            let sizes: Vec<String> = sizes.iter().map(ToString::to_string).collect();
            context.push_str(&format!("  Sizes in stock: {}\n", sizes.join(", ")));
        }
    }
    context
}

/// System prompt, then the tail of the client history, then the new message.
/// Client-supplied system turns are dropped.
pub fn build_messages(
    system_prompt: String,
    history: &[ChatMessage],
    history_limit: usize,
    message: &str,
) -> Vec<ChatMessage> {
    let history: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .collect();
    let tail = &history[history.len().saturating_sub(history_limit)..];

    let mut messages = Vec::with_capacity(tail.len() + 2);
    messages.push(ChatMessage::new(ChatRole::System, system_prompt));
    messages.extend(tail.iter().map(|m| (*m).clone()));
    messages.push(ChatMessage::new(ChatRole::User, message));
    messages
}

#[derive(Clone)]
pub struct ChatService {
    catalog: Arc<CatalogService>,
    client: Option<Arc<dyn CompletionClient>>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        catalog: Arc<CatalogService>,
        client: Option<Arc<dyn CompletionClient>>,
        config: ChatConfig,
    ) -> Self {
        Self {
            catalog,
            client,
            config,
        }
    }

    /// Builds the HTTP client from config; without an API key the assistant
    /// answers every request with the fallback reply.
    pub fn from_config(catalog: Arc<CatalogService>, config: ChatConfig) -> anyhow::Result<Self> {
        let client: Option<Arc<dyn CompletionClient>> = match config.api_key.clone() {
            Some(key) if !key.trim().is_empty() => {
                Some(Arc::new(HttpCompletionClient::new(&config, key)?))
            }
            _ => {
                warn!("Chat API key not configured; chat relay disabled");
                None
            }
        };
        Ok(Self::new(catalog, client, config))
    }

    #[instrument(skip(self, request), fields(history = request.conversation_history.len()))]
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ServiceError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "Message cannot be empty".to_string(),
            ));
        }

        let Some(client) = &self.client else {
            metrics::record_chat_request("unavailable");
            return Err(ServiceError::ServiceUnavailable(FALLBACK_REPLY.to_string()));
        };

        let mut system_prompt = SHOP_KNOWLEDGE.to_string();
        if mentions_products(message, &self.config.product_keywords) {
            let terms = search_terms(message);
            match self
                .catalog
                .search_by_words(&terms, self.config.search_limit)
                .await
            {
                Ok(products) => system_prompt.push_str(&product_context(&products)),
                // Answer without catalog context rather than fail the chat.
                Err(e) => warn!(error = %e, "Catalog lookup for chat failed"),
            }
        }

        let completion = CompletionRequest {
            model: self.config.model.clone(),
            messages: build_messages(
                system_prompt,
                &request.conversation_history,
                self.config.history_limit,
                message,
            ),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: 1.0,
            stream: false,
        };

        match client.complete(&completion).await {
            Ok(response) => {
                metrics::record_chat_request("ok");
                info!("Chat reply generated");
                Ok(ChatReply {
                    response: response
                        .first_content()
                        .unwrap_or(EMPTY_COMPLETION_REPLY)
                        .to_string(),
                    usage: response.usage,
                })
            }
            Err(CompletionError::RateLimited) => {
                metrics::record_chat_request("rate_limited");
                Err(ServiceError::RateLimited(RATE_LIMITED_REPLY.to_string()))
            }
            Err(e) => {
                metrics::record_chat_request("error");
                error!(error = %e, "Chat completion failed");
                Err(ServiceError::ServiceUnavailable(FALLBACK_REPLY.to_string()))
            }
        }
    }
}
