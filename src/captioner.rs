//! Model host: a quantized BLIP captioning model running on candle.
//!
//! Loaded once at startup and shared across requests. Generation is greedy
//! (argmax) decoding, so identical input bytes produce identical captions.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip;
use candle_transformers::models::quantized_blip;
use hf_hub::api::tokio::Api;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::state::CaptionModel;

/// BLIP's `[DEC]` token, prepended to start generation.
const BOS_TOKEN_ID: u32 = 30522;
/// BLIP's `[SEP]` token, terminates the caption.
const SEP_TOKEN_ID: u32 = 102;
/// Upper bound on generated caption tokens.
const MAX_CAPTION_TOKENS: usize = 40;
/// Seed for the logits processor; irrelevant under argmax but required.
const SEED: u64 = 42;

/// Input resolution expected by the BLIP vision encoder.
const IMAGE_SIZE: usize = 384;
const IMAGE_MEAN: &[f32] = &[0.48145466, 0.4578275, 0.40821073];
const IMAGE_STD: &[f32] = &[0.26862954, 0.261_302_6, 0.275_777_1];

pub struct Captioner {
    model: quantized_blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    device: Device,
}

impl Captioner {
    /// Resolve the tokenizer and quantized weights through the Hugging Face
    /// Hub, pick a device, and build the model. Any failure here is returned
    /// to the caller; the server decides whether to run degraded.
    pub async fn load(config: &ModelConfig) -> Result<Self> {
        let api = Api::new().context("failed to create Hugging Face Hub API client")?;

        let tokenizer_file = api
            .model(config.tokenizer_repo.clone())
            .get("tokenizer.json")
            .await
            .with_context(|| format!("failed to fetch tokenizer from {}", config.tokenizer_repo))?;
        let weights_file = api
            .model(config.weights_repo.clone())
            .get(&config.weights_file)
            .await
            .with_context(|| format!("failed to fetch weights from {}", config.weights_repo))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_file)
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;

        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        info!(?device, "loading caption model");

        let vb = quantized_blip::VarBuilder::from_gguf(&weights_file, &device)?;
        let model = quantized_blip::BlipForConditionalGeneration::new(
            &blip::Config::image_captioning_large(),
            vb,
        )?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }
}

impl CaptionModel for Captioner {
    fn caption(&mut self, image_bytes: &[u8]) -> Result<String> {
        let pixel_values = preprocess(image_bytes, &self.device)?;
        let image_embeds = pixel_values.unsqueeze(0)?.apply(self.model.vision_model())?;

        // Each request decodes from scratch.
        self.model.reset_kv_cache();
        let mut logits_processor = logits_processor();

        let mut token_ids = vec![BOS_TOKEN_ID];
        for index in 0..MAX_CAPTION_TOKENS {
            let context_size = if index > 0 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self.model.text_decoder().forward(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let token = logits_processor.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            token_ids.push(token);
        }

        let caption = self
            .tokenizer
            .decode(&token_ids, true)
            .map_err(|e| anyhow!("failed to decode caption tokens: {e}"))?;
        let caption = caption.trim().to_string();
        debug!(%caption, "generated caption");
        Ok(caption)
    }
}

/// Seed only, no temperature, no top-p: candle treats this as argmax
/// sampling, so identical input bytes always decode to the same caption.
fn logits_processor() -> LogitsProcessor {
    LogitsProcessor::new(SEED, None, None)
}

/// Decode image bytes and lay them out as the normalized `(3, 384, 384)` f32
/// tensor the vision encoder expects.
pub fn preprocess(image_bytes: &[u8], device: &Device) -> Result<Tensor> {
    let img = image::load_from_memory(image_bytes)
        .context("failed to decode image")?
        .resize_to_fill(
            IMAGE_SIZE as u32,
            IMAGE_SIZE as u32,
            image::imageops::FilterType::Triangle,
        );
    let data = img.to_rgb8().into_raw();
    let data = Tensor::from_vec(data, (IMAGE_SIZE, IMAGE_SIZE, 3), device)?.permute((2, 0, 1))?;
    let mean = Tensor::new(IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(IMAGE_STD, device)?.reshape((3, 1, 1))?;
    let pixel_values = (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;
    Ok(pixel_values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn preprocess_produces_normalized_chw_tensor() {
        let bytes = png_bytes(8, 8, [255, 0, 0]);
        let tensor = preprocess(&bytes, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[3, IMAGE_SIZE, IMAGE_SIZE]);
        assert_eq!(tensor.dtype(), DType::F32);

        // A uniform red image stays uniform through resizing, so every pixel
        // in channel 0 is (1.0 - mean) / std.
        let red = tensor.i((0, 0, 0)).unwrap().to_scalar::<f32>().unwrap();
        let expected = (1.0 - IMAGE_MEAN[0]) / IMAGE_STD[0];
        assert!((red - expected).abs() < 1e-4, "got {red}, want {expected}");

        let green = tensor.i((1, 0, 0)).unwrap().to_scalar::<f32>().unwrap();
        let expected_green = (0.0 - IMAGE_MEAN[1]) / IMAGE_STD[1];
        assert!((green - expected_green).abs() < 1e-4);
    }

    #[test]
    fn preprocess_handles_non_square_input() {
        let bytes = png_bytes(64, 16, [10, 20, 30]);
        let tensor = preprocess(&bytes, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[3, IMAGE_SIZE, IMAGE_SIZE]);
    }

    #[test]
    fn decoding_is_greedy_and_deterministic() {
        // Near-uniform logits: a sampled draw would scatter across indices,
        // argmax always lands on the peak.
        let logits = Tensor::new(&[0.05f32, 0.10, 0.09, 0.08, 0.07], &Device::Cpu).unwrap();
        let mut first = logits_processor();
        let mut second = logits_processor();
        for _ in 0..32 {
            assert_eq!(first.sample(&logits).unwrap(), 1);
            assert_eq!(second.sample(&logits).unwrap(), 1);
        }
    }

    #[test]
    fn preprocess_rejects_garbage_bytes() {
        let err = preprocess(b"definitely not an image", &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("failed to decode image"));
    }
}
