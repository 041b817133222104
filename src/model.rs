use std::{fs, path::Path};

use crate::{
    errors::{Result, TileSegError},
    semaphore::Semaphore,
    traits::{ModelLoader, ModelRuntime, RuntimeOptions},
};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::Session,
};
use parking_lot::Mutex;

/// ONNX Runtime backed segmentation model.
///
/// Holds one session per concurrent caller. A call takes a permit from the
/// semaphore and then an idle session, so two calls never share a session.
pub struct OrtModel {
    input_name: String,
    output_name: String,
    sessions: Vec<Mutex<Session>>,
    permits: Semaphore,
}

impl OrtModel {
    pub fn new(model_path: &Path, options: &RuntimeOptions) -> Result<Self> {
        let bytes = fs::read(model_path).map_err(|source| TileSegError::Artifact {
            path: model_path.to_path_buf(),
            source,
        })?;

        let count = options.sessions.max(1);
        let mut sessions = Vec::with_capacity(count);
        for _ in 0..count {
            sessions.push(build_session(&bytes, model_path, options)?);
        }

        let (input_name, output_name) = {
            let session = &sessions[0];
            let input = session
                .inputs
                .first()
                .ok_or_else(|| badly_encoded(model_path, "model declares no inputs"))?;
            let output = session
                .outputs
                .first()
                .ok_or_else(|| badly_encoded(model_path, "model declares no outputs"))?;

            // NHWC: [batch, height, width, channels]; dynamic axes are negative.
            if let Some(shape) = input.input_type.tensor_shape() {
                for &declared in shape.iter().skip(1).take(2) {
                    if declared > 0 && declared != i64::from(options.tile_size) {
                        return Err(badly_encoded(
                            model_path,
                            &format!(
                                "model expects {declared}px tiles, pipeline uses {}px",
                                options.tile_size
                            ),
                        ));
                    }
                }
            }
            (input.name.clone(), output.name.clone())
        };

        // initialize model
        let size = options.tile_size as usize;
        let data = Array4::<f32>::zeros((1, size, size, 3));
        for session in &mut sessions {
            session
                .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data).map_err(|e| TileSegError::model("初期化テンソル作成", e))?])
                .map_err(|e| badly_encoded(model_path, &format!("warm-up inference failed: {e}")))?;
        }

        log::debug!(
            "loaded {} with {} session(s), acceleration={}",
            model_path.display(),
            count,
            options.acceleration
        );

        Ok(Self {
            input_name,
            output_name,
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            permits: Semaphore::new(count),
        })
    }
}

fn build_session(bytes: &[u8], model_path: &Path, options: &RuntimeOptions) -> Result<Session> {
    let mut builder =
        Session::builder().map_err(|e| TileSegError::model("セッションビルダー初期化", e))?;

    if options.acceleration {
        builder = builder
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(options.device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(options.device_id)
                    .build(),
            ])
            .map_err(|e| TileSegError::model("実行プロバイダー設定", e))?;
    }

    builder
        .with_intra_threads(options.threads_per_call)
        .map_err(|e| TileSegError::model("スレッド数設定", e))?
        .with_memory_pattern(true)
        .map_err(|e| TileSegError::model("メモリパターン設定", e))?
        .commit_from_memory(bytes)
        .map_err(|e| badly_encoded(model_path, &e.to_string()))
}

fn badly_encoded(model_path: &Path, reason: &str) -> TileSegError {
    TileSegError::ArtifactFormat {
        path: model_path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl ModelRuntime for OrtModel {
    fn infer(&self, tensor: ArrayView4<f32>) -> Result<Array3<f32>> {
        let (_, height, width, _) = tensor.dim();
        let _permit = self.permits.acquire();
        let mut binding = self
            .sessions
            .iter()
            .find_map(|session| session.try_lock())
            .ok_or_else(|| TileSegError::model("セッション取得", "no idle session"))?;

        let outputs = binding.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?],
        )?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_shape_with_order((1, height, width))?)
    }
}

impl Drop for OrtModel {
    fn drop(&mut self) {
        log::debug!("releasing {} onnx session(s)", self.sessions.len());
    }
}

/// Loads ONNX artifacts into [`OrtModel`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrtLoader;

impl ModelLoader for OrtLoader {
    type Runtime = OrtModel;

    fn load(&self, artifact: &Path, options: &RuntimeOptions) -> Result<OrtModel> {
        OrtModel::new(artifact, options)
    }
}
