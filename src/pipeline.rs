// Command orchestration. Each public method runs one user command through
//
//     Idle -> Preparing -> Sending -> Classifying -> Done | Failed
//
// (read-only commands skip Preparing, the local preview never sends) and
// returns a typed result for the UI to print. A failed command leaves no
// state behind, so the caller can simply move on to the next one.

use chrono::Local;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::anonymize::{Anonymized, Anonymizer};
use crate::api::{HttpTransport, Outcome, Request, ResilientClient, Transport};
use crate::codec;
use crate::error::CommandError;
use crate::records::{
    self, Higi, HigiAdded, ImageDownload, ImageSummary, ImageUpload, NewHigi, ParseError,
    Stats, UploadReceipt,
};

/// Format of the `timetaken` field sent with an upload.
pub const TIME_TAKEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Preparing,
    Sending,
    Classifying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Tracks where a single command is in its lifecycle.
struct Run {
    command: &'static str,
    stage: Stage,
}

impl Run {
    fn start(command: &'static str) -> Self {
        Run {
            command,
            stage: Stage::Idle,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!("{}: {} -> {}", self.command, self.stage, next);
        self.stage = next;
    }

    fn finish<R>(mut self, result: Result<R, CommandError>) -> Result<R, CommandError> {
        match &result {
            Ok(_) => self.advance(Stage::Done),
            Err(err) => {
                warn!("{} failed: {}", self.command, err);
                self.advance(Stage::Failed);
            }
        }
        result
    }
}

/// Result of a successful download.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub higi_id: i64,
    pub time_taken: String,
    pub bucket_key: String,
    pub path: PathBuf,
    pub size: usize,
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct Uploaded {
    pub image_id: i64,
    /// Number of regions that were blurred before sending.
    pub regions: usize,
}

// A 200 body together with the URL it came from, so that anything going
// wrong while reading it is reported against that URL.
struct Reply {
    url: String,
    body: String,
}

impl Reply {
    fn parse<R: DeserializeOwned>(&self) -> Result<R, CommandError> {
        records::parse(&self.body).map_err(|source| self.unusable(source))
    }

    fn parse_listing<R: DeserializeOwned>(&self) -> Result<Vec<R>, CommandError> {
        records::parse_listing(&self.body).map_err(|source| self.unusable(source))
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, CommandError> {
        codec::decode(text).map_err(|source| CommandError::Decode {
            url: self.url.clone(),
            source,
        })
    }

    fn unusable(&self, source: ParseError) -> CommandError {
        CommandError::Parse {
            url: self.url.clone(),
            source,
        }
    }
}

/// File name a downloaded image is stored under.
pub fn download_file_name(image_id: &str) -> String {
    format!("image_{}.jpg", image_id)
}

pub struct Pipeline<T = HttpTransport> {
    client: ResilientClient<T>,
    anonymizer: Anonymizer,
    download_dir: PathBuf,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(
        client: ResilientClient<T>,
        anonymizer: Anonymizer,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Pipeline {
            client,
            anonymizer,
            download_dir: download_dir.into(),
        }
    }

    pub fn client(&self) -> &ResilientClient<T> {
        &self.client
    }

    /// GET /stats
    pub fn stats(&self) -> Result<Stats, CommandError> {
        let mut run = Run::start("stats");
        let result = self
            .exchange(&mut run, Request::get("/stats"))
            .and_then(|reply| reply.parse());
        run.finish(result)
    }

    /// GET /higis
    pub fn higis(&self) -> Result<Vec<Higi>, CommandError> {
        let mut run = Run::start("higis");
        let result = self
            .exchange(&mut run, Request::get("/higis"))
            .and_then(|reply| reply.parse_listing());
        run.finish(result)
    }

    /// GET /images
    pub fn images(&self) -> Result<Vec<ImageSummary>, CommandError> {
        let mut run = Run::start("images");
        let result = self
            .exchange(&mut run, Request::get("/images"))
            .and_then(|reply| reply.parse_listing());
        run.finish(result)
    }

    /// PUT /higi with a freshly generated bucket folder.
    pub fn add_higi(&self, location: &str) -> Result<HigiAdded, CommandError> {
        let mut run = Run::start("add_higi");
        let result = self.try_add_higi(&mut run, location);
        run.finish(result)
    }

    fn try_add_higi(&self, run: &mut Run, location: &str) -> Result<HigiAdded, CommandError> {
        let body = NewHigi {
            location: location.to_string(),
            bucket_folder: Uuid::new_v4().to_string(),
        };
        let request = Request::put("/higi", &body).map_err(|source| CommandError::Parse {
            url: self.client.url_for("/higi"),
            source,
        })?;
        self.exchange(run, request)?.parse()
    }

    /// GET /image/{id}, then write the payload to `image_<id>.jpg`.
    pub fn download(&self, image_id: &str) -> Result<Downloaded, CommandError> {
        let mut run = Run::start("download");
        let result = self.try_download(&mut run, image_id);
        run.finish(result)
    }

    fn try_download(&self, run: &mut Run, image_id: &str) -> Result<Downloaded, CommandError> {
        run.advance(Stage::Preparing);
        let image_id = checked_id(image_id)?;
        let request = Request::get(format!("/image/{}", image_id));

        let reply = self.exchange(run, request)?;
        let record: ImageDownload = reply.parse()?;
        // Decode fully before touching the disk.
        let bytes = reply.decode(&record.data)?;

        let path = self.download_dir.join(download_file_name(image_id));
        fs::write(&path, &bytes).map_err(|e| CommandError::io(&path, e))?;

        Ok(Downloaded {
            higi_id: record.higi_id,
            time_taken: record.time_taken,
            bucket_key: record.bucket_key,
            path,
            size: bytes.len(),
        })
    }

    /// Anonymize a local image and POST it to /image/{higi_id}.
    pub fn upload(&self, local_file: &Path, higi_id: &str) -> Result<Uploaded, CommandError> {
        let mut run = Run::start("upload");
        let result = self.try_upload(&mut run, local_file, higi_id);
        run.finish(result)
    }

    fn try_upload(
        &self,
        run: &mut Run,
        local_file: &Path,
        higi_id: &str,
    ) -> Result<Uploaded, CommandError> {
        run.advance(Stage::Preparing);
        let higi_id = checked_id(higi_id)?;
        let anonymized = self.prepare(local_file)?;

        let body = ImageUpload {
            data: codec::encode(&anonymized.data),
            time_taken: Local::now().format(TIME_TAKEN_FORMAT).to_string(),
        };
        let path = format!("/image/{}", higi_id);
        let request = Request::post(path.as_str(), &body).map_err(|source| CommandError::Parse {
            url: self.client.url_for(&path),
            source,
        })?;

        let receipt: UploadReceipt = self.exchange(run, request)?.parse()?;
        Ok(Uploaded {
            image_id: receipt.image_id,
            regions: anonymized.regions.len(),
        })
    }

    /// Anonymize a local image and write it to `output` without uploading.
    pub fn preview(&self, local_file: &Path, output: &Path) -> Result<Anonymized, CommandError> {
        let mut run = Run::start("preview");
        run.advance(Stage::Preparing);
        let result = self.prepare(local_file).and_then(|anonymized| {
            fs::write(output, &anonymized.data).map_err(|e| CommandError::io(output, e))?;
            Ok(anonymized)
        });
        run.finish(result)
    }

    fn prepare(&self, local_file: &Path) -> Result<Anonymized, CommandError> {
        if !local_file.is_file() {
            return Err(CommandError::FileNotFound(local_file.to_path_buf()));
        }
        let bytes = fs::read(local_file).map_err(|e| CommandError::io(local_file, e))?;
        Ok(self.anonymizer.process(&bytes)?)
    }

    fn exchange(&self, run: &mut Run, request: Request) -> Result<Reply, CommandError> {
        let url = self.client.url_for(request.path());
        run.advance(Stage::Sending);
        let outcome = self.client.send(request);
        run.advance(Stage::Classifying);

        match outcome {
            Outcome::Success { body } => Ok(Reply { url, body }),
            Outcome::ClientError { message } => Err(CommandError::Rejected {
                status: 400,
                url,
                message: Some(message),
            }),
            Outcome::ServerError { message } => Err(CommandError::Rejected {
                status: 500,
                url,
                message: Some(message),
            }),
            Outcome::Unexpected { status, .. } => Err(CommandError::Rejected {
                status,
                url,
                message: None,
            }),
            Outcome::TransportFailure { cause } => Err(CommandError::Transport { url, cause }),
        }
    }
}

// Ids end up in a URL path and a file name, so only plain tokens pass.
fn checked_id(raw: &str) -> Result<&str, CommandError> {
    let id = raw.trim();
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(CommandError::InvalidId(raw.to_string()))
    }
}
