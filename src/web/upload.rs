use axum::extract::Multipart;
use chrono::NaiveDate;

use super::ApiError;
use crate::models::ImageMime;

/// Fields of a photo form after validation.
#[derive(Debug)]
pub struct ImageUpload {
    pub date: NaiveDate,
    pub image: Vec<u8>,
    pub mime_type: ImageMime,
    pub text: Option<String>,
    pub amount: Option<f64>,
    pub unit: Option<String>,
}

/// Reads `date`, `image` and the optional `text`, `amount`, `unit` fields.
pub async fn read_image_form(mut multipart: Multipart, max_bytes: usize) -> Result<ImageUpload, ApiError> {
    let mut date = None;
    let mut image: Option<(Vec<u8>, Option<String>)> = None;
    let mut text = None;
    let mut amount = None;
    let mut unit = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("could not read image: {}", e)))?;
                image = Some((bytes.to_vec(), content_type));
            }
            "date" | "text" | "amount" | "unit" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("could not read {}: {}", name, e)))?;
                let value = value.trim().to_string();
                match name.as_str() {
                    "date" => date = Some(value),
                    "text" => text = Some(value).filter(|v| !v.is_empty()),
                    "amount" => amount = parse_amount(&value),
                    _ => unit = Some(value).filter(|v| !v.is_empty()),
                }
            }
            other => log::debug!("Ignoring unknown form field {:?}", other),
        }
    }

    let date = date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| ApiError::bad_request("date must be YYYY-MM-DD"))?;

    let (image, content_type) = image
        .filter(|(bytes, _)| !bytes.is_empty())
        .ok_or_else(|| ApiError::bad_request("please choose an image"))?;

    let mime_type = content_type
        .as_deref()
        .and_then(ImageMime::from_mime)
        .ok_or_else(|| ApiError::bad_request("only JPG, PNG or WEBP images are supported"))?;

    if image.len() > max_bytes {
        return Err(ApiError::bad_request(format!(
            "image is too large (max {} MB)",
            max_bytes / (1024 * 1024)
        )));
    }

    Ok(ImageUpload {
        date,
        image,
        mime_type,
        text,
        amount,
        unit,
    })
}

/// Blank, non-numeric or non-positive amounts are treated as absent.
fn parse_amount(value: &str) -> Option<f64> {
    value
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite() && *a > 0.0)
}
