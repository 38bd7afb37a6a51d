use std::io::Cursor;

use anyhow::{Context, Result};
use archive_contracts::inline_image::{InlineImage, DEFAULT_MIME};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::providers::{ImageProvider, ImageRequest, TextProvider, TextRequest};

const DRYRUN_SIZE: u32 = 256;

/// Offline provider: deterministic output, no network.
pub(crate) struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ImageRequest) -> Result<InlineImage> {
        let tint = color_from_prompt(&request.prompt);
        let image = match &request.source {
            Some(source) => tint_source(source, tint)?,
            None => solid_image(DRYRUN_SIZE, DRYRUN_SIZE, tint),
        };
        let bytes = encode_png(&DynamicImage::ImageRgb8(image))?;
        Ok(InlineImage::from_bytes(DEFAULT_MIME, &bytes))
    }
}

impl TextProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, request: &TextRequest) -> Result<String> {
        Ok(dryrun_label(&request.prompt))
    }
}

fn solid_image(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> RgbImage {
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    image
}

/// Averages every source pixel with the instruction color.
fn tint_source(source: &InlineImage, (r, g, b): (u8, u8, u8)) -> Result<RgbImage> {
    let bytes = source.decode()?;
    let mut image = image::load_from_memory(&bytes)
        .context("dryrun edit could not decode source image")?
        .to_rgb8();
    for pixel in image.pixels_mut() {
        let [sr, sg, sb] = pixel.0;
        *pixel = Rgb([blend(sr, r), blend(sg, g), blend(sb, b)]);
    }
    Ok(image)
}

fn blend(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b)) / 2) as u8
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("dryrun png encode failed")?;
    Ok(bytes)
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// Longest alphabetic word of the quoted `Prompt: "..."` line, capitalized.
/// Falls back to the whole text when no such line is present.
fn dryrun_label(text: &str) -> String {
    let subject = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("Prompt:"))
        .map(|rest| rest.trim().trim_matches('"'))
        .unwrap_or(text);

    let mut best = "";
    for word in subject.split(|ch: char| !ch.is_alphabetic()) {
        if word.chars().count() > best.chars().count() {
            best = word;
        }
    }

    let mut chars = best.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str, source: Option<InlineImage>) -> ImageRequest {
        ImageRequest {
            model: "dryrun-image-1".to_string(),
            prompt: prompt.to_string(),
            source,
        }
    }

    #[test]
    fn generate_is_deterministic_png() -> Result<()> {
        let first = DryrunProvider.generate(&request("neon city", None))?;
        let second = DryrunProvider.generate(&request("neon city", None))?;
        assert_eq!(first, second);
        assert_eq!(first.mime_type, "image/png");

        let decoded = image::load_from_memory(&first.decode()?)?;
        assert_eq!(decoded.width(), DRYRUN_SIZE);
        assert_eq!(decoded.height(), DRYRUN_SIZE);
        Ok(())
    }

    #[test]
    fn edit_keeps_source_dimensions_and_changes_pixels() -> Result<()> {
        let small = solid_image(8, 4, (0, 0, 0));
        let source = InlineImage::from_bytes(
            DEFAULT_MIME,
            &encode_png(&DynamicImage::ImageRgb8(small))?,
        );
        let edited = DryrunProvider.generate(&request("make it warmer", Some(source.clone())))?;
        assert_ne!(edited, source);

        let decoded = image::load_from_memory(&edited.decode()?)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 4));
        let (r, g, b) = color_from_prompt("make it warmer");
        assert_eq!(decoded.get_pixel(0, 0).0, [r / 2, g / 2, b / 2]);
        Ok(())
    }

    #[test]
    fn edit_with_garbage_source_fails() {
        let source = InlineImage::new("image/png", "bm90IGFuIGltYWdl");
        assert!(DryrunProvider
            .generate(&request("anything", Some(source)))
            .is_err());
    }

    #[test]
    fn label_comes_from_quoted_prompt_line() {
        let prompt = "Categorize this.\nPrompt: \"a small BATMOBILE chase\"\nOnly the word.";
        assert_eq!(dryrun_label(prompt), "Batmobile");
        assert_eq!(dryrun_label("red fox"), "Red");
        assert_eq!(dryrun_label("!!! 42"), "");
    }
}
