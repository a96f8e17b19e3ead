//! Model and explainer hosted in an external interpreter process

use crate::backend::{ExplainerBackend, ModelBackend, RawExplanation, RawPrediction};
use crate::BackendError;
use feature_engine::FeatureVector;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const PREDICT_COMMAND: &str = "predict_single";
const EXPLAIN_COMMAND: &str = "explain_prediction";

/// Longest stderr excerpt kept in an error
const STDERR_EXCERPT: usize = 512;

/// Runs `<interpreter> [args] <script> <command> '<features json>'` per call.
///
/// The script prints one JSON object as its last non-empty stdout line.
/// The child is killed if the call is dropped, so a timeout never leaves
/// an orphaned process behind.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    interpreter: PathBuf,
    interpreter_args: Vec<String>,
    script: PathBuf,
}

impl SubprocessBackend {
    /// Python-style launcher; `-B` keeps the interpreter from writing bytecode
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: vec!["-B".to_string()],
            script: script.into(),
        }
    }

    /// Replace the flags passed before the script path
    pub fn with_interpreter_args(mut self, args: Vec<String>) -> Self {
        self.interpreter_args = args;
        self
    }

    async fn run<T: DeserializeOwned>(&self, command: &str, vector: &FeatureVector) -> Result<T, BackendError> {
        let payload = serde_json::to_string(&vector.keyed())
            .map_err(|e| BackendError::Malformed(format!("cannot encode features: {}", e)))?;

        debug!(
            "Running {} {} {}",
            self.interpreter.display(),
            self.script.display(),
            command
        );

        let output = Command::new(&self.interpreter)
            .args(&self.interpreter_args)
            .arg(&self.script)
            .arg(command)
            .arg(payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Spawn(format!("{}: {}", self.interpreter.display(), e)))?;

        if !output.status.success() {
            let stderr = excerpt(&String::from_utf8_lossy(&output.stderr));
            warn!("{} exited with {}: {}", command, output.status, stderr);
            return Err(BackendError::Exit {
                code: output.status.code(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| BackendError::Malformed(format!("{} produced no output", command)))?;

        serde_json::from_str(line).map_err(|e| BackendError::Malformed(format!("{}: {}", command, e)))
    }
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

impl ModelBackend for SubprocessBackend {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn infer(&self, vector: &FeatureVector) -> Result<RawPrediction, BackendError> {
        self.run(PREDICT_COMMAND, vector).await
    }
}

impl ExplainerBackend for SubprocessBackend {
    async fn explain(&self, vector: &FeatureVector) -> Result<RawExplanation, BackendError> {
        self.run(EXPLAIN_COMMAND, vector).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::policy::InvocationPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    const MODEL_SCRIPT: &str = r#"
case "$1" in
  predict_single)
    echo "loading model"
    echo '{"success": true, "prediction": 1, "probability_class_0": 0.25, "probability_class_1": 0.75}'
    ;;
  explain_prediction)
    echo '{"success": true, "base_value": 0.5, "explanations": [{"feature": "a", "value": 1.0, "shap_value": 0.2}]}'
    ;;
  record_payload)
    printf '%s' "$2" > "$(dirname "$0")/payload.json"
    echo '{"success": true, "prediction": 0, "probability_class_0": 0.5, "probability_class_1": 0.5}'
    ;;
  garbage)
    echo "not json"
    ;;
  slow)
    sleep 5
    ;;
  *)
    echo "unknown command $1" >&2
    exit 3
    ;;
esac
"#;

    fn backend(dir: &TempDir) -> SubprocessBackend {
        let script = dir.path().join("model.sh");
        std::fs::write(&script, MODEL_SCRIPT).unwrap();
        SubprocessBackend::new("sh", script).with_interpreter_args(Vec::new())
    }

    fn vector() -> FeatureVector {
        FeatureVector {
            names: vec!["b".to_string(), "a".to_string()],
            values: vec![2.0, 1.0],
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_predict_reads_last_line() {
        let dir = TempDir::new().unwrap();
        let raw = backend(&dir).infer(&vector()).await.unwrap();

        assert!(raw.success);
        assert_eq!(raw.prediction, Some(1));
        assert_eq!(raw.probability_class_1, Some(0.75));
    }

    #[tokio::test]
    async fn test_explain_output() {
        let dir = TempDir::new().unwrap();
        let raw = backend(&dir).explain(&vector()).await.unwrap();

        assert_eq!(raw.base_value, Some(0.5));
        assert_eq!(raw.explanations.len(), 1);
        assert_eq!(raw.explanations[0].feature, "a");
    }

    #[tokio::test]
    async fn test_payload_is_keyed_in_model_order() {
        let dir = TempDir::new().unwrap();
        let raw: RawPrediction = backend(&dir).run("record_payload", &vector()).await.unwrap();
        assert!(raw.success);

        let payload = std::fs::read_to_string(dir.path().join("payload.json")).unwrap();
        assert_eq!(payload, r#"{"b":2.0,"a":1.0}"#);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let err = backend(&dir)
            .run::<RawPrediction>("bogus", &vector())
            .await
            .unwrap_err();

        match err {
            BackendError::Exit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("unknown command bogus"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_output() {
        let dir = TempDir::new().unwrap();
        let err = backend(&dir)
            .run::<RawPrediction>("garbage", &vector())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let backend = SubprocessBackend::new("/nonexistent/interpreter", "model.py");
        let err = backend.infer(&vector()).await.unwrap_err();
        assert!(matches!(err, BackendError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_slow_child_times_out() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        let policy = InvocationPolicy::new(Duration::from_millis(200));

        let err = policy
            .invoke(backend.run::<RawPrediction>("slow", &vector()))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Timeout(200));
    }

    #[test]
    fn test_stderr_excerpt_is_bounded() {
        let long = "x".repeat(STDERR_EXCERPT * 2);
        assert_eq!(excerpt(&long).len(), STDERR_EXCERPT + 3);
        assert_eq!(excerpt("  short\n"), "short");
    }
}
