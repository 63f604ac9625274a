use thiserror::Error;

use super::models::{DownloadRequest, FormatsRequest};

pub const URL_MIN_CHARS: usize = 10;
pub const URL_MAX_CHARS: usize = 2048;
pub const FORMAT_ID_MAX_CHARS: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("url must be between {URL_MIN_CHARS} and {URL_MAX_CHARS} characters")]
    UrlLength,
    #[error("format_id cannot be empty")]
    EmptyFormatId,
    #[error("format_id exceeds {FORMAT_ID_MAX_CHARS} characters")]
    FormatIdTooLong,
}

fn check_url(url: &str) -> Result<String, RequestValidationError> {
    let url = url.trim();
    let len = url.chars().count();
    if !(URL_MIN_CHARS..=URL_MAX_CHARS).contains(&len) {
        return Err(RequestValidationError::UrlLength);
    }
    Ok(url.to_string())
}

/// Trim and bound-check the request; returns the cleaned copy.
pub fn validate_formats(request: &FormatsRequest) -> Result<FormatsRequest, RequestValidationError> {
    Ok(FormatsRequest {
        url: check_url(&request.url)?,
    })
}

pub fn validate_download(request: &DownloadRequest) -> Result<DownloadRequest, RequestValidationError> {
    let url = check_url(&request.url)?;
    let format_id = request.format_id.trim();
    if format_id.is_empty() {
        return Err(RequestValidationError::EmptyFormatId);
    }
    if format_id.chars().count() > FORMAT_ID_MAX_CHARS {
        return Err(RequestValidationError::FormatIdTooLong);
    }
    Ok(DownloadRequest {
        url,
        format_id: format_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download(url: &str, format_id: &str) -> DownloadRequest {
        DownloadRequest {
            url: url.to_string(),
            format_id: format_id.to_string(),
        }
    }

    #[test]
    fn test_url_is_trimmed_then_bounded() {
        let ok = validate_formats(&FormatsRequest {
            url: "  https://a.io/v  ".into(),
        })
        .unwrap();
        assert_eq!(ok.url, "https://a.io/v");

        let short = validate_formats(&FormatsRequest {
            url: "   http://x   ".into(),
        });
        assert_eq!(short.unwrap_err(), RequestValidationError::UrlLength);

        let long = format!("https://a.io/{}", "v".repeat(URL_MAX_CHARS));
        assert_eq!(
            validate_formats(&FormatsRequest { url: long }).unwrap_err(),
            RequestValidationError::UrlLength
        );
    }

    #[test]
    fn test_format_id_bounds() {
        assert_eq!(
            validate_download(&download("https://a.io/watch", "  ")).unwrap_err(),
            RequestValidationError::EmptyFormatId
        );
        assert_eq!(
            validate_download(&download("https://a.io/watch", &"1".repeat(501))).unwrap_err(),
            RequestValidationError::FormatIdTooLong
        );
        let ok = validate_download(&download("https://a.io/watch", " 22 ")).unwrap();
        assert_eq!(ok.format_id, "22");
    }
}
