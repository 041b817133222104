use crate::errors::Result;
use crate::pipeline::{PipelineOutput, PipelineState, Progress};
use crate::TileSegError;
use ndarray::prelude::*;
use std::path::Path;

/// セグメンテーションモデル実行環境の抽象化
///
/// 入力は `(1, T, T, 3)` の正規化済みテンソル、出力は `(1, T, T)` のスコア。
/// 一回の呼び出しは一つのタイルに対応し、複数スレッドから同時に呼ばれうる。
pub trait ModelRuntime: Send + Sync {
    /// タイル一枚分の推論を実行
    fn infer(&self, tensor: ArrayView4<f32>) -> Result<Array3<f32>>;
}

/// ランタイム生成時のオプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// 情報用のアクセラレーションフラグ（ONNXではTensorRT/CUDAを登録）
    pub acceleration: bool,
    pub device_id: i32,
    /// 一回の推論呼び出しが使うスレッド数
    pub threads_per_call: usize,
    /// 同時に実行できる推論呼び出しの数
    pub sessions: usize,
    /// モデルが受け付けるタイルの一辺
    pub tile_size: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            acceleration: false,
            device_id: 0,
            threads_per_call: 1,
            sessions: 1,
            tile_size: 256,
        }
    }
}

/// モデルアーティファクトの読み込みの抽象化
///
/// 読み込み失敗は例外ではなく型付きエラー（`Artifact` / `ArtifactFormat`）で返す。
pub trait ModelLoader: Send + Sync {
    type Runtime: ModelRuntime + 'static;

    fn load(&self, artifact: &Path, options: &RuntimeOptions) -> Result<Self::Runtime>;
}

/// パイプラインの進捗・結果通知を受け取る側
///
/// 一回の実行につき `on_success` と `on_error` のどちらか一方だけが呼ばれる。
pub trait PipelineObserver {
    fn on_state(&self, _state: PipelineState) {}

    fn on_progress(&self, _progress: Progress) {}

    fn on_success(&self, _output: &PipelineOutput) {}

    fn on_error(&self, _error: &TileSegError) {}
}

/// 何も通知しないオブザーバー
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
