use crate::errors::{Result, TileSegError};
use crate::traits::{ModelLoader, ModelRuntime, RuntimeOptions};
use ndarray::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// テスト用の観測値（呼び出し回数・同時実行数・解放回数）
#[derive(Debug, Default)]
pub struct MockProbe {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak_concurrency: AtomicUsize,
    loads: AtomicUsize,
    released: AtomicUsize,
}

impl MockProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// モックの振る舞い。呼び出し番号は0始まり
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub delay: Duration,
    pub fail_on_call: Option<usize>,
    pub panic_on_call: Option<usize>,
    pub hang_on_call: Option<(usize, Duration)>,
}

/// テスト用のモックランタイム
///
/// スコアは入力テンソルの赤チャンネルをそのまま返すため、
/// 赤い領域が前景（白）になる。
#[derive(Debug, Default)]
pub struct MockRuntime {
    behavior: MockBehavior,
    probe: Arc<MockProbe>,
}

impl MockRuntime {
    pub fn new(behavior: MockBehavior, probe: Arc<MockProbe>) -> Self {
        Self { behavior, probe }
    }
}

struct ActiveCall<'a>(&'a MockProbe);

impl<'a> ActiveCall<'a> {
    fn enter(probe: &'a MockProbe) -> Self {
        let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        probe.peak_concurrency.fetch_max(now, Ordering::SeqCst);
        Self(probe)
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ModelRuntime for MockRuntime {
    fn infer(&self, tensor: ArrayView4<f32>) -> Result<Array3<f32>> {
        let call = self.probe.calls.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveCall::enter(&self.probe);

        if !self.behavior.delay.is_zero() {
            thread::sleep(self.behavior.delay);
        }
        if let Some((hang_call, hang_for)) = self.behavior.hang_on_call {
            if hang_call == call {
                thread::sleep(hang_for);
            }
        }
        if self.behavior.panic_on_call == Some(call) {
            panic!("mock runtime panicked on call {call}");
        }
        if self.behavior.fail_on_call == Some(call) {
            return Err(TileSegError::model(
                "mock inference",
                format!("injected failure on call {call}"),
            ));
        }

        // 赤チャンネル (1, H, W, 3) -> (1, H, W)
        Ok(tensor.index_axis(Axis(3), 0).to_owned())
    }
}

impl Drop for MockRuntime {
    fn drop(&mut self) {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// テスト用のモックローダー
///
/// アーティファクトが存在しなければ `Artifact`、空ファイルなら `ArtifactFormat` を返す。
#[derive(Debug, Default, Clone)]
pub struct MockLoader {
    behavior: MockBehavior,
    probe: Arc<MockProbe>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn probe(&self) -> Arc<MockProbe> {
        Arc::clone(&self.probe)
    }
}

impl ModelLoader for MockLoader {
    type Runtime = MockRuntime;

    fn load(&self, artifact: &Path, _options: &RuntimeOptions) -> Result<MockRuntime> {
        let metadata = std::fs::metadata(artifact).map_err(|source| TileSegError::Artifact {
            path: artifact.to_path_buf(),
            source,
        })?;
        if metadata.len() == 0 {
            return Err(TileSegError::ArtifactFormat {
                path: artifact.to_path_buf(),
                reason: "empty model file".to_string(),
            });
        }

        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        Ok(MockRuntime::new(
            self.behavior.clone(),
            Arc::clone(&self.probe),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_runtime_scores_red_channel() -> Result<()> {
        let mut tensor = Array4::<f32>::zeros((1, 4, 4, 3));
        tensor[[0, 2, 1, 0]] = 0.9;
        tensor[[0, 2, 2, 1]] = 0.9;

        let scores = MockRuntime::default().infer(tensor.view())?;
        assert_eq!(scores.shape(), &[1, 4, 4]);
        assert_eq!(scores[[0, 2, 1]], 0.9);
        assert_eq!(scores[[0, 2, 2]], 0.0);
        Ok(())
    }

    #[test]
    fn test_mock_runtime_injected_failure() {
        let probe = Arc::new(MockProbe::default());
        let runtime = MockRuntime::new(
            MockBehavior {
                fail_on_call: Some(1),
                ..MockBehavior::default()
            },
            Arc::clone(&probe),
        );
        let tensor = Array4::<f32>::zeros((1, 2, 2, 3));

        assert!(runtime.infer(tensor.view()).is_ok());
        assert!(runtime.infer(tensor.view()).is_err());
        assert_eq!(probe.calls(), 2);

        drop(runtime);
        assert_eq!(probe.released(), 1);
    }

    #[test]
    fn test_mock_loader_missing_artifact() {
        let loader = MockLoader::new();
        let result = loader.load(Path::new("missing.onnx"), &RuntimeOptions::default());
        assert!(matches!(result, Err(TileSegError::Artifact { .. })));
        assert_eq!(loader.probe().loads(), 0);
    }
}
