use crate::codec::{encode_audio_base64, read_timing_cues, CodecError};
use crate::media::{MediaError, MediaPipeline, RequestWorkspace};
use crate::session::SharedConversation;
use avatar_core::client::ChatCompletion;
use avatar_core::config::MediaConfig;
use avatar_core::dialogue::{
    parse_dialogue, Animation, DialogueLine, DialogueReply, EnrichedLine, FacialExpression,
};
use avatar_core::errors::AvatarError;
use avatar_core::tts::SpeechSynthesizer;
use avatar_core::types::ChatMessage;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Canned greeting served when the request carries no message: text,
/// expression, animation and the asset stem under the audio directory.
const INTRO: [(&str, FacialExpression, Animation, &str); 2] = [
    (
        "Hey dear... How was your day?",
        FacialExpression::Smile,
        Animation::Talking1,
        "intro_0",
    ),
    (
        "I missed you so much... Please don't go for so long!",
        FacialExpression::Sad,
        Animation::Crying,
        "intro_1",
    ),
];

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("LLM request failed: {0}")]
    Llm(#[source] AvatarError),

    #[error("LLM reply could not be parsed: {0}")]
    Parse(#[source] AvatarError),

    #[error("Text-to-speech failed for message {index}: {source}")]
    Tts {
        index: usize,
        #[source]
        source: AvatarError,
    },

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Drives one chat turn: conversation update, LLM call, then speech and
/// lip-sync generation for every returned line.
pub struct Coordinator {
    llm: Arc<dyn ChatCompletion>,
    tts: Arc<dyn SpeechSynthesizer>,
    media: MediaPipeline,
    conversation: SharedConversation,
    audio_dir: PathBuf,
    keep_artifacts: bool,
}

impl Coordinator {
    pub fn new(
        llm: Arc<dyn ChatCompletion>,
        tts: Arc<dyn SpeechSynthesizer>,
        conversation: SharedConversation,
        media_config: &MediaConfig,
    ) -> Self {
        Self {
            llm,
            tts,
            media: MediaPipeline::from_config(media_config),
            conversation,
            audio_dir: media_config.audio_dir(),
            keep_artifacts: media_config.keep_artifacts(),
        }
    }

    pub fn conversation(&self) -> &SharedConversation {
        &self.conversation
    }

    /// Answer a chat request. An absent or empty message gets the intro.
    pub async fn respond(&self, message: Option<&str>) -> Result<DialogueReply, CoordinatorError> {
        match message {
            Some(text) if !text.is_empty() => self.process_message(text).await,
            _ => {
                info!("No user message provided, sending intro");
                Ok(self.intro_reply().await)
            }
        }
    }

    /// The fixed two-line greeting, built from pre-rendered assets.
    ///
    /// Missing or unreadable assets only drop the corresponding field.
    pub async fn intro_reply(&self) -> DialogueReply {
        let mut messages = Vec::with_capacity(INTRO.len());
        for (text, expression, animation, stem) in INTRO {
            let audio_path = self.audio_dir.join(format!("{}.wav", stem));
            let cues_path = self.audio_dir.join(format!("{}.json", stem));

            let audio = encode_audio_base64(&audio_path)
                .await
                .map_err(|e| warn!(error = %e, "Intro audio unavailable"))
                .ok();
            let lipsync = read_timing_cues(&cues_path)
                .await
                .map_err(|e| warn!(error = %e, "Intro lip sync unavailable"))
                .ok();

            messages.push(EnrichedLine {
                line: DialogueLine::new(text, expression, animation),
                audio,
                lipsync,
            });
        }
        DialogueReply { messages }
    }

    /// Run a full chat turn for a non-empty user message
    pub async fn process_message(&self, message: &str) -> Result<DialogueReply, CoordinatorError> {
        info!(message_len = message.len(), "Received user message");

        let lines = self.request_dialogue(message).await?;
        info!(count = lines.len(), "Parsed dialogue lines from LLM");

        // Dropping the workspace removes its directory, also on cancellation
        let workspace = RequestWorkspace::create(&self.audio_dir, self.keep_artifacts).await?;
        let request_id = workspace.request_id();
        let result = self.enrich_lines(&workspace, lines).await;
        drop(workspace);

        match result {
            Ok(messages) => {
                info!(%request_id, count = messages.len(), "Chat turn completed");
                Ok(DialogueReply { messages })
            }
            Err(e) => {
                error!(%request_id, error = %e, "Chat turn failed");
                Err(e)
            }
        }
    }

    /// Append the user turn, call the LLM with the full history and record its reply.
    ///
    /// The conversation lock is held for the whole exchange so turns from
    /// concurrent requests cannot interleave. A failed call leaves the user
    /// turn in place.
    async fn request_dialogue(&self, message: &str) -> Result<Vec<DialogueLine>, CoordinatorError> {
        let content = {
            let mut conversation = self.conversation.lock().await;
            conversation.append(ChatMessage::user(message));
            debug!(
                provider = self.llm.provider_name(),
                model = %self.llm.model_name(),
                turns = conversation.len(),
                "Calling LLM"
            );

            let content = self
                .llm
                .complete(conversation.entries())
                .await
                .map_err(CoordinatorError::Llm)?;
            conversation.append(ChatMessage::assistant(content.clone()));
            content
        };
        debug!(content = %content, "LLM reply");

        parse_dialogue(&content).map_err(CoordinatorError::Parse)
    }

    /// Synthesize, lip-sync and encode each line in order. The first failure aborts the loop.
    async fn enrich_lines(
        &self,
        workspace: &RequestWorkspace,
        lines: Vec<DialogueLine>,
    ) -> Result<Vec<EnrichedLine>, CoordinatorError> {
        let mut enriched = Vec::with_capacity(lines.len());

        for (index, line) in lines.into_iter().enumerate() {
            let files = workspace.files(index);
            info!(index, text = %line.text, "Processing message");

            self.tts
                .synthesize_to_file(&line.text, &files.mp3)
                .await
                .map_err(|source| CoordinatorError::Tts { index, source })?;
            debug!(index, provider = self.tts.provider_name(), "Text-to-speech completed");

            self.media.lip_sync(&files).await?;

            let audio = encode_audio_base64(&files.mp3).await?;
            let lipsync = read_timing_cues(&files.cues).await?;
            debug!(index, "Audio and lip sync attached");

            enriched.push(EnrichedLine {
                line,
                audio: Some(audio),
                lipsync: Some(lipsync),
            });
        }

        Ok(enriched)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::Conversation;
    use async_trait::async_trait;
    use avatar_core::errors::AvatarResult;
    use avatar_core::types::Role;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;

    /// LLM stand-in that records each history it is sent
    pub(crate) struct ScriptedLlm {
        reply: Result<String, String>,
        pub(crate) seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        pub(crate) fn replying(content: &str) -> Self {
            Self {
                reply: Ok(content.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                reply: Err("upstream unavailable".to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedLlm {
        async fn complete(&self, history: &[ChatMessage]) -> AvatarResult<String> {
            self.seen.lock().unwrap().push(history.to_vec());
            match &self.reply {
                Ok(content) => Ok(content.clone()),
                Err(message) => Err(AvatarError::HttpError {
                    status_code: 503,
                    message: message.clone(),
                }),
            }
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        fn model_name(&self) -> String {
            "test".to_string()
        }
    }

    /// TTS stand-in that writes the text itself as the "audio"
    #[derive(Default)]
    pub(crate) struct EchoTts {
        pub(crate) calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for EchoTts {
        async fn synthesize_to_file(&self, text: &str, output: &Path) -> AvatarResult<()> {
            self.calls.lock().unwrap().push(text.to_string());
            tokio::fs::write(output, format!("audio:{}", text)).await?;
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "echo"
        }
    }

    pub(crate) fn media_config(audio_dir: &Path, lipsync_command: &str) -> MediaConfig {
        MediaConfig {
            audio_dir: Some(audio_dir.to_path_buf()),
            transcode_command: Some("cp {input} {output}".to_string()),
            lipsync_command: Some(lipsync_command.to_string()),
            command_timeout_secs: Some(5),
            keep_artifacts: Some(false),
        }
    }

    pub(crate) const GOOD_ALIGNER: &str =
        "printf '{\"mouthCues\":[{\"start\":0,\"end\":0.5,\"value\":\"B\"}]}' > {output}";

    fn coordinator(
        llm: Arc<ScriptedLlm>,
        tts: Arc<EchoTts>,
        audio_dir: &Path,
        aligner: &str,
    ) -> Coordinator {
        Coordinator::new(
            llm,
            tts,
            Conversation::shared("SYSTEM"),
            &media_config(audio_dir, aligner),
        )
    }

    fn decode(audio: &Option<String>) -> String {
        String::from_utf8(STANDARD.decode(audio.as_ref().unwrap()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_intro_without_message_skips_upstreams() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("intro_0.wav"), b"wav0").await.unwrap();
        tokio::fs::write(dir.path().join("intro_0.json"), r#"{"mouthCues":[]}"#)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("intro_1.wav"), b"wav1").await.unwrap();
        tokio::fs::write(dir.path().join("intro_1.json"), r#"{"mouthCues":[]}"#)
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::failing());
        let tts = Arc::new(EchoTts::default());
        let coordinator = coordinator(llm.clone(), tts.clone(), dir.path(), "exit 1");

        for message in [None, Some("")] {
            let reply = coordinator.respond(message).await.unwrap();
            assert_eq!(reply.messages.len(), 2);
            assert_eq!(reply.messages[0].line.facial_expression, FacialExpression::Smile);
            assert_eq!(reply.messages[0].line.animation, Animation::Talking1);
            assert_eq!(reply.messages[1].line.facial_expression, FacialExpression::Sad);
            assert_eq!(reply.messages[1].line.animation, Animation::Crying);
            assert_eq!(decode(&reply.messages[1].audio), "wav1");
            assert_eq!(
                reply.messages[0].lipsync.as_ref().unwrap().0,
                json!({"mouthCues": []})
            );
        }

        assert!(llm.seen.lock().unwrap().is_empty());
        assert!(tts.calls.lock().unwrap().is_empty());
        assert_eq!(coordinator.conversation().lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_intro_with_missing_assets_omits_media() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(
            Arc::new(ScriptedLlm::failing()),
            Arc::new(EchoTts::default()),
            dir.path(),
            GOOD_ALIGNER,
        );

        let reply = coordinator.intro_reply().await;
        assert_eq!(reply.messages.len(), 2);
        assert!(reply.messages.iter().all(|m| m.audio.is_none() && m.lipsync.is_none()));
    }

    #[tokio::test]
    async fn test_hello_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::replying(
            r#"[{"text": "Hi! I'm so happy to see you.", "facialExpression": "smile", "animation": "Talking_0"}]"#,
        ));
        let tts = Arc::new(EchoTts::default());
        let coordinator = coordinator(llm.clone(), tts.clone(), dir.path(), GOOD_ALIGNER);

        let reply = coordinator.respond(Some("Hello")).await.unwrap();
        assert_eq!(reply.messages.len(), 1);
        let line = &reply.messages[0];
        assert_eq!(line.line.text, "Hi! I'm so happy to see you.");
        assert_eq!(decode(&line.audio), "audio:Hi! I'm so happy to see you.");
        assert_eq!(
            line.lipsync.as_ref().unwrap().0["mouthCues"][0]["value"],
            "B"
        );

        // The LLM saw the system instruction first and exactly one user turn, last
        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let history = &seen[0];
        assert_eq!(history[0], ChatMessage::system("SYSTEM"));
        assert_eq!(history.last().unwrap(), &ChatMessage::user("Hello"));
        assert_eq!(history.iter().filter(|m| m.role == Role::User).count(), 1);
    }

    #[tokio::test]
    async fn test_lines_keep_order_and_history_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::replying(
            r#"{"messages": [
                {"text": "one", "facialExpression": "smile", "animation": "Talking_0"},
                {"text": "two", "facialExpression": "surprised", "animation": "Laughing"},
                {"text": "three", "facialExpression": "angry", "animation": "Angry"}
            ]}"#,
        ));
        let tts = Arc::new(EchoTts::default());
        let coordinator = coordinator(llm.clone(), tts.clone(), dir.path(), GOOD_ALIGNER);

        let reply = coordinator.respond(Some("first")).await.unwrap();
        let texts: Vec<&str> = reply.messages.iter().map(|m| m.line.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        for message in &reply.messages {
            assert_eq!(decode(&message.audio), format!("audio:{}", message.line.text));
            assert!(message.lipsync.is_some());
        }
        assert_eq!(*tts.calls.lock().unwrap(), vec!["one", "two", "three"]);

        coordinator.respond(Some("second")).await.unwrap();
        let seen = llm.seen.lock().unwrap();
        // system, user, assistant, user
        assert_eq!(seen[1].len(), 4);
        assert_eq!(seen[1][2].role, Role::Assistant);
        assert_eq!(seen[1][3], ChatMessage::user("second"));

        // Request directories are cleaned up
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aligner_failure_aborts_whole_turn() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::replying(
            r#"[{"text": "a"}, {"text": "b"}, {"text": "c"}]"#,
        ));
        let tts = Arc::new(EchoTts::default());
        let aligner = format!("case {{input}} in *message_1.wav) exit 1;; esac; {}", GOOD_ALIGNER);
        let coordinator = coordinator(llm, tts.clone(), dir.path(), &aligner);

        let err = coordinator.respond(Some("Hello")).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Media(MediaError::Align { index: 1, .. })
        ));
        // Line 2 was never started
        assert_eq!(*tts.calls.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cancelled_turn_removes_request_dir() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(coordinator(
            Arc::new(ScriptedLlm::replying(r#"[{"text": "slow"}]"#)),
            Arc::new(EchoTts::default()),
            dir.path(),
            "sleep 3",
        ));

        let turn = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.respond(Some("Hello")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        turn.abort();
        assert!(turn.await.unwrap_err().is_cancelled());

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_turns_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::replying(r#"[{"text": "ok"}]"#));
        let coordinator = Arc::new(coordinator(
            llm.clone(),
            Arc::new(EchoTts::default()),
            dir.path(),
            GOOD_ALIGNER,
        ));

        let turns: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.respond(Some(&format!("message {}", i))).await
                })
            })
            .collect();
        for turn in turns {
            turn.await.unwrap().unwrap();
        }

        let conversation = coordinator.conversation().lock().await;
        let entries = conversation.entries();
        assert_eq!(entries.len(), 17);
        assert_eq!(entries[0].role, Role::System);
        for pair in entries[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
        // Every call saw a complete history ending in its own user turn
        for history in llm.seen.lock().unwrap().iter() {
            assert_eq!(history.len() % 2, 0);
            assert_eq!(history.last().unwrap().role, Role::User);
        }
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_user_turn() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(
            Arc::new(ScriptedLlm::failing()),
            Arc::new(EchoTts::default()),
            dir.path(),
            GOOD_ALIGNER,
        );

        let err = coordinator.respond(Some("Hello")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Llm(_)));

        let conversation = coordinator.conversation().lock().await;
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.entries()[1], ChatMessage::user("Hello"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(EchoTts::default());
        let coordinator = coordinator(
            Arc::new(ScriptedLlm::replying("I'd rather just chat normally.")),
            tts.clone(),
            dir.path(),
            GOOD_ALIGNER,
        );

        let err = coordinator.respond(Some("Hello")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Parse(_)));
        assert!(tts.calls.lock().unwrap().is_empty());
    }
}
