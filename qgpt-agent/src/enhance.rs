use qgpt_types::{EnhancedQuestion, Exchange, ReplySource};
use tracing::warn;

use crate::protocol::{AgentReply, Protocol};

/// Rewrites a question into a more explicit form for the generator.
///
/// Never fails: any error, timeout or blank answer leaves the question as it
/// was, tagged [`ReplySource::Fallback`].
#[derive(Clone)]
pub struct PromptEnhancer {
    protocol: Protocol,
}

impl PromptEnhancer {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    fn prompt(question: &str) -> String {
        format!(
            "Expand the following analytics question with additional helpful context, without changing its intent.\n\
             Make the result concise and specific.\n\
             Return only the enhanced question text.\n\
             Question: {question}\n"
        )
    }

    pub async fn enhance(&self, question: &str, dry_run: bool) -> AgentReply<EnhancedQuestion> {
        let unchanged = || EnhancedQuestion {
            question: question.to_string(),
            expanded: question.to_string(),
        };
        if dry_run {
            return AgentReply {
                value: unchanged(),
                source: ReplySource::Passthrough,
                exchanges: Vec::new(),
            };
        }

        let prompt = Self::prompt(question);
        let answer = match self.protocol.ask(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "question enhancement failed, using original question");
                None
            }
        };
        let expanded = answer.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match expanded {
            Some(text) => AgentReply {
                value: EnhancedQuestion {
                    question: question.to_string(),
                    expanded: text.to_string(),
                },
                source: ReplySource::Model,
                exchanges: vec![Exchange {
                    prompt,
                    response: text.to_string(),
                }],
            },
            None => AgentReply {
                value: unchanged(),
                source: ReplySource::Fallback,
                exchanges: vec![Exchange {
                    prompt,
                    response: answer.unwrap_or_default(),
                }],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qgpt_infer::ScriptedClient;
    use std::sync::Arc;
    use std::time::Duration;

    fn enhancer(client: ScriptedClient) -> PromptEnhancer {
        PromptEnhancer::new(Protocol::new(Arc::new(client), Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn expanded_text_is_trimmed() {
        let reply = enhancer(ScriptedClient::new(["  Count completed trips in Seattle for yesterday.\n"]))
            .enhance("trips yesterday", false)
            .await;
        assert_eq!(reply.value.expanded, "Count completed trips in Seattle for yesterday.");
        assert_eq!(reply.value.question, "trips yesterday");
        assert_eq!(reply.source, ReplySource::Model);
    }

    #[tokio::test]
    async fn transport_error_keeps_original() {
        let reply = enhancer(ScriptedClient::new(Vec::<String>::new()).then_fail("503"))
            .enhance("trips yesterday", false)
            .await;
        assert_eq!(reply.value.expanded, "trips yesterday");
        assert_eq!(reply.source, ReplySource::Fallback);
    }

    #[tokio::test]
    async fn blank_or_slow_answer_keeps_original() {
        let reply = enhancer(ScriptedClient::new(["   "])).enhance("q", false).await;
        assert_eq!(reply.value.expanded, "q");

        let slow = ScriptedClient::new(Vec::<String>::new()).then_stall(Duration::from_secs(2), "late");
        let reply = enhancer(slow).enhance("q", false).await;
        assert_eq!(reply.value.expanded, "q");
        assert_eq!(reply.source, ReplySource::Fallback);
    }

    #[tokio::test]
    async fn dry_run_is_identity() {
        let client = Arc::new(ScriptedClient::new(Vec::<String>::new()));
        let enhancer = PromptEnhancer::new(Protocol::new(client.clone(), Duration::from_secs(1)));
        let reply = enhancer.enhance("q", true).await;
        assert_eq!(reply.value.expanded, "q");
        assert_eq!(reply.source, ReplySource::Passthrough);
        assert_eq!(client.call_count(), 0);
    }
}
