// Fixed-field records for the JSON bodies the web service returns. Each
// body is mapped in one go: a missing or mistyped field is a ParseError,
// never a half-filled record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed JSON body: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// Deserialize a response body into `T`.
pub fn parse<T: DeserializeOwned>(body: &str) -> Result<T, ParseError> {
    Ok(serde_json::from_str(body)?)
}

/// Deserialize a `{"data": [...]}` listing.
pub fn parse_listing<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, ParseError> {
    let listing: Listing<T> = parse(body)?;
    Ok(listing.data)
}

#[derive(Deserialize)]
struct Listing<T> {
    data: Vec<T>,
}

/// Body carried by every 400/500 answer.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// GET /stats
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Stats {
    /// Bucket status as reported by the service.
    pub message: String,
    #[serde(rename = "db_numHigis")]
    pub num_higis: i64,
    #[serde(rename = "db_numImages")]
    pub num_images: i64,
}

/// A capture device and the bucket folder its images are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Higi {
    #[serde(rename = "higiid")]
    pub id: i64,
    #[serde(rename = "higiloc")]
    pub location: String,
    #[serde(rename = "bucketfolder")]
    pub bucket_folder: String,
}

/// One row of GET /images.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageSummary {
    #[serde(rename = "imageid")]
    pub id: i64,
    #[serde(rename = "timetaken")]
    pub time_taken: String,
    #[serde(rename = "bucketkey")]
    pub bucket_key: String,
}

/// Body of PUT /higi.
#[derive(Debug, Clone, Serialize)]
pub struct NewHigi {
    #[serde(rename = "higiloc")]
    pub location: String,
    #[serde(rename = "bucketfolder")]
    pub bucket_folder: String,
}

/// Answer to PUT /higi. `message` says whether the row was inserted or updated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HigiAdded {
    #[serde(rename = "higiid")]
    pub id: i64,
    pub message: String,
}

/// Answer to GET /image/{id}; `data` is still transfer-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageDownload {
    pub higi_id: i64,
    pub time_taken: String,
    pub bucket_key: String,
    pub data: String,
}

/// Body of POST /image/{higiid}.
#[derive(Debug, Clone, Serialize)]
pub struct ImageUpload {
    pub data: String,
    #[serde(rename = "timetaken")]
    pub time_taken: String,
}

/// Answer to POST /image/{higiid}.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    #[serde(rename = "imageid")]
    pub image_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_maps_service_field_names() {
        let body = r#"{"message":"success","db_numHigis":3,"db_numImages":12}"#;
        let stats: Stats = parse(body).unwrap();
        assert_eq!(
            stats,
            Stats {
                message: "success".into(),
                num_higis: 3,
                num_images: 12
            }
        );
    }

    #[test]
    fn higi_listing_parses_every_row() {
        let body = r#"{"message":"success","data":[
            {"higiid":1,"higiloc":"Lab A","bucketfolder":"f1"},
            {"higiid":2,"higiloc":"Lab B","bucketfolder":"f2"}]}"#;
        let higis: Vec<Higi> = parse_listing(body).unwrap();
        assert_eq!(higis.len(), 2);
        assert_eq!(higis[1].location, "Lab B");
    }

    #[test]
    fn missing_field_is_an_error() {
        let body = r#"{"data":[{"imageid":7,"timetaken":"2024-01-01 10:00:00"}]}"#;
        assert!(parse_listing::<ImageSummary>(body).is_err());
    }

    #[test]
    fn mistyped_field_is_an_error() {
        let body = r#"{"imageid":"seven"}"#;
        assert!(parse::<UploadReceipt>(body).is_err());
    }

    #[test]
    fn upload_body_uses_service_field_names() {
        let body = ImageUpload {
            data: "AAAA".into(),
            time_taken: "2024-01-01 10:00:00".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["data"], "AAAA");
        assert_eq!(json["timetaken"], "2024-01-01 10:00:00");
    }
}
