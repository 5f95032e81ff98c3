use sha2::{Digest, Sha256};

use super::{ChatReply, ChatRequest, ModelCallFailure, VisionModel};

/// Offline provider that answers from the request itself.
pub struct DryrunProvider;

impl VisionModel for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ModelCallFailure> {
        let images = request
            .images
            .iter()
            .map(|bytes| {
                let digest = hex::encode(Sha256::digest(bytes));
                format!("{} bytes, sha256 {}", bytes.len(), &digest[..12])
            })
            .collect::<Vec<String>>();
        let text = if images.is_empty() {
            format!("[dryrun] No image attached to \"{}\".", request.prompt)
        } else {
            format!(
                "[dryrun] Reply to \"{}\" for {}.",
                request.prompt,
                images.join("; ")
            )
        };
        let output_tokens = text.split_whitespace().count() as u64;
        Ok(ChatReply {
            text,
            model: Some(format!("dryrun/{}", request.model)),
            prompt_tokens: Some(request.prompt.split_whitespace().count() as u64),
            output_tokens: Some(output_tokens),
            total_duration_ns: Some(0),
        })
    }
}
