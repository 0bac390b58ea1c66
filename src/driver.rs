//! Driving a conversation against the API.
//!
//! Keeps the history consistent with what the model has seen: a question and its reply are
//! appended together once the exchange has succeeded. A failed exchange, or an async one that is
//! dropped before it completes, leaves the history as it was.

use crate::{
    Api,
    conversation::Conversation,
    exchange::{self, AsyncTransport, ExchangeError, Transport},
    retry::RetryPolicy,
};

/// Sends the injection turn and records the model's acknowledgement.
pub fn acknowledge<T: Transport + ?Sized>(
    api: &Api,
    conversation: &mut Conversation,
    transport: &T,
    policy: &RetryPolicy,
) -> Result<String, ExchangeError> {
    let request = conversation.acknowledgement_request(api);
    let text = exchange::exchange(transport, policy, &request)?;
    conversation.record_reply(text.clone());
    Ok(text)
}

/// Asks a question, recording it together with the answer on success.
pub fn ask<T: Transport + ?Sized>(
    api: &Api,
    conversation: &mut Conversation,
    transport: &T,
    policy: &RetryPolicy,
    question: &str,
) -> Result<String, ExchangeError> {
    let request = conversation.question_request(api, question);
    let result = exchange::exchange(transport, policy, &request);
    settle(conversation, question, result)
}

/// Async version of [`acknowledge`].
pub async fn acknowledge_async<T: AsyncTransport + ?Sized>(
    api: &Api,
    conversation: &mut Conversation,
    transport: &T,
    policy: &RetryPolicy,
) -> Result<String, ExchangeError> {
    let request = conversation.acknowledgement_request(api);
    let text = exchange::exchange_async(transport, policy, &request).await?;
    conversation.record_reply(text.clone());
    Ok(text)
}

/// Async version of [`ask`].
pub async fn ask_async<T: AsyncTransport + ?Sized>(
    api: &Api,
    conversation: &mut Conversation,
    transport: &T,
    policy: &RetryPolicy,
    question: &str,
) -> Result<String, ExchangeError> {
    let request = conversation.question_request(api, question);
    let result = exchange::exchange_async(transport, policy, &request).await;
    settle(conversation, question, result)
}

fn settle(
    conversation: &mut Conversation,
    question: &str,
    result: Result<String, ExchangeError>,
) -> Result<String, ExchangeError> {
    match result {
        Ok(text) => {
            conversation.record_exchange(question, text.clone());
            Ok(text)
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                turns = conversation.len(),
                "exchange failed, history unchanged"
            );
            Err(err)
        }
    }
}

/// A blocking, acknowledged conversation.
#[derive(Debug)]
pub struct Driver<T> {
    api: Api,
    conversation: Conversation,
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> Driver<T> {
    /// Acknowledges a seeded conversation and returns the driver together with the
    /// acknowledgement text.
    pub fn start(
        api: Api,
        mut conversation: Conversation,
        transport: T,
        policy: RetryPolicy,
    ) -> Result<(Self, String), ExchangeError> {
        let acknowledgement = acknowledge(&api, &mut conversation, &transport, &policy)?;
        tracing::info!(turns = conversation.len(), "conversation acknowledged");

        Ok((
            Self {
                api,
                conversation,
                transport,
                policy,
            },
            acknowledgement,
        ))
    }

    /// Asks a question. On failure, the conversation is left as it was before the call.
    pub fn ask(&mut self, question: &str) -> Result<String, ExchangeError> {
        ask(
            &self.api,
            &mut self.conversation,
            &self.transport,
            &self.policy,
            question,
        )
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{Driver, acknowledge_async, ask_async};
    use crate::{
        Api,
        conversation::Conversation,
        corpus::CorpusBlob,
        exchange::{AsyncTransport, ExchangeError, RawResponse, TransportError, testing::Scripted},
        gemini::Role,
        http_request::HttpRequest,
        retry::RetryPolicy,
    };

    /// Never answers.
    struct Stalled;

    #[async_trait]
    impl AsyncTransport for Stalled {
        async fn send(&self, _request: &HttpRequest) -> Result<RawResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn seeded() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.seed("Use only this dataset.", &CorpusBlob::from(r#"[{"a": 1}]"#));
        conversation
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::default().base_delay(Duration::from_millis(1))
    }

    #[test]
    fn start_sends_only_the_injection_turn() {
        let transport = Scripted::new().answer("Dataset received.");

        let (driver, ack) =
            Driver::start(Api::new("k"), seeded(), &transport, fast()).unwrap();

        assert_eq!(ack, "Dataset received.");
        assert_eq!(transport.last_body()["contents"].as_array().unwrap().len(), 1);
        assert_eq!(driver.conversation().len(), 2);
        assert_eq!(driver.conversation().history()[1].role, Role::Model);
    }

    #[test]
    fn failed_start_is_an_error() {
        let transport = Scripted::new().reply(400, "too large");

        let err = Driver::start(Api::new("k"), seeded(), &transport, fast()).unwrap_err();
        assert!(matches!(err, ExchangeError::BadRequest { .. }));
    }

    #[test]
    fn successful_question_appends_two_turns() {
        let transport = Scripted::new().answer("ack").answer("a is 1");
        let (mut driver, _) = Driver::start(Api::new("k"), seeded(), &transport, fast()).unwrap();

        let answer = driver.ask("What is a?").unwrap();

        assert_eq!(answer, "a is 1");
        assert_eq!(driver.conversation().len(), 4);
        assert_eq!(transport.last_body()["contents"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn failed_question_leaves_history_unchanged() {
        let transport = Scripted::new()
            .answer("ack")
            .reply(500, "internal")
            .answer("a is 1");
        let (mut driver, _) = Driver::start(Api::new("k"), seeded(), &transport, fast()).unwrap();
        let before = driver.conversation().len();

        assert!(driver.ask("What is a?").is_err());
        assert_eq!(driver.conversation().len(), before);

        // The retried question is sent on top of the unchanged history.
        driver.ask("What is a?").unwrap();
        let body = transport.last_body();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[2]["parts"][0]["text"], "What is a?");
    }

    #[tokio::test]
    async fn async_functions_follow_the_same_contract() {
        let api = Api::new("k");
        let transport = Scripted::new().answer("ack").fail("timeout").answer("fine");
        let mut conversation = seeded();

        acknowledge_async(&api, &mut conversation, &transport, &fast())
            .await
            .unwrap();
        assert_eq!(conversation.len(), 2);

        let err = ask_async(&api, &mut conversation, &transport, &fast(), "q")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Transport(_)));
        assert_eq!(conversation.len(), 2);

        let answer = ask_async(&api, &mut conversation, &transport, &fast(), "q")
            .await
            .unwrap();
        assert_eq!(answer, "fine");
        assert_eq!(conversation.len(), 4);
    }

    #[tokio::test]
    async fn abandoned_question_leaves_history_untouched() {
        let api = Api::new("k");
        let mut conversation = seeded();
        conversation.record_reply("ack");
        let before = conversation.history().clone();

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            ask_async(&api, &mut conversation, &Stalled, &fast(), "never answered"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(conversation.history(), &before);
    }
}
