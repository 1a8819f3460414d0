// UI layer: the interactive command menu, built on `dialoguer`.
// Each entry prompts for its inputs, hands off to the pipeline and prints
// the result. A failed command is reported and the menu comes back.

use anyhow::Result;
use dialoguer::{Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use crate::api::Transport;
use crate::error::CommandError;
use crate::pipeline::Pipeline;

const MENU: [&str; 8] = [
    "end",
    "stats",
    "higis",
    "images",
    "download",
    "add higi",
    "upload",
    "preview (blur locally, no upload)",
];

/// Run the menu until the user picks "end". Only terminal I/O errors end the
/// loop early; command failures are printed and the next prompt follows.
pub fn main_menu<T: Transport>(pipeline: &Pipeline<T>) -> Result<()> {
    loop {
        println!();
        let selection = Select::new()
            .with_prompt("Enter a command")
            .items(&MENU[..])
            .default(1)
            .interact()?;
        match selection {
            0 => break,
            1 => stats(pipeline),
            2 => higis(pipeline),
            3 => images(pipeline),
            4 => download(pipeline)?,
            5 => add_higi(pipeline)?,
            6 => upload(pipeline)?,
            7 => preview(pipeline)?,
            _ => println!("** Unknown command, try again..."),
        }
    }
    Ok(())
}

fn stats<T: Transport>(pipeline: &Pipeline<T>) {
    match with_spinner("Fetching stats...", || pipeline.stats()) {
        Ok(stats) => {
            println!("bucket status: {}", stats.message);
            println!("# of higis: {}", stats.num_higis);
            println!("# of images: {}", stats.num_images);
        }
        Err(e) => report(&e),
    }
}

fn higis<T: Transport>(pipeline: &Pipeline<T>) {
    match with_spinner("Fetching higis...", || pipeline.higis()) {
        Ok(higis) => {
            for higi in higis {
                println!("{}", higi.id);
                println!("  {}", higi.location);
                println!("  {}", higi.bucket_folder);
            }
        }
        Err(e) => report(&e),
    }
}

fn images<T: Transport>(pipeline: &Pipeline<T>) {
    match with_spinner("Fetching images...", || pipeline.images()) {
        Ok(images) => {
            for image in images {
                println!("{}", image.id);
                println!("  {}", image.time_taken);
                println!("  {}", image.bucket_key);
            }
        }
        Err(e) => report(&e),
    }
}

fn download<T: Transport>(pipeline: &Pipeline<T>) -> Result<()> {
    let image_id: String = Input::new().with_prompt("Enter image id").interact_text()?;
    match with_spinner("Downloading...", || pipeline.download(&image_id)) {
        Ok(done) => {
            println!("higi id: {}", done.higi_id);
            println!("photo time taken: {}", done.time_taken);
            println!("bucket key: {}", done.bucket_key);
            println!("Downloaded and saved as '{}'", done.path.display());
        }
        Err(e) => report(&e),
    }
    Ok(())
}

fn add_higi<T: Transport>(pipeline: &Pipeline<T>) -> Result<()> {
    let location: String = Input::new().with_prompt("Enter the location").interact_text()?;
    match with_spinner("Adding higi...", || pipeline.add_higi(&location)) {
        Ok(added) => println!("Higi {} successfully {}", added.id, added.message),
        Err(e) => report(&e),
    }
    Ok(())
}

fn upload<T: Transport>(pipeline: &Pipeline<T>) -> Result<()> {
    let local: String = Input::new().with_prompt("Enter local filename").interact_text()?;
    let local = PathBuf::from(local);
    if !local.is_file() {
        println!("Local file '{}' does not exist...", local.display());
        return Ok(());
    }
    let higi_id: String = Input::new().with_prompt("Enter higi id").interact_text()?;
    match with_spinner("Blurring faces and uploading...", || {
        pipeline.upload(&local, &higi_id)
    }) {
        Ok(done) => {
            println!("Blurred {} region(s)", done.regions);
            println!("Image uploaded, image id = {}", done.image_id);
        }
        Err(e) => report(&e),
    }
    Ok(())
}

fn preview<T: Transport>(pipeline: &Pipeline<T>) -> Result<()> {
    let local: String = Input::new().with_prompt("Enter local filename").interact_text()?;
    let output: String = Input::<String>::new()
        .with_prompt("Save blurred copy as")
        .default("blurred.jpg".into())
        .interact_text()?;
    match with_spinner("Blurring faces...", || {
        pipeline.preview(&PathBuf::from(&local), &PathBuf::from(&output))
    }) {
        Ok(done) => println!("Blurred {} region(s), saved as '{}'", done.regions.len(), output),
        Err(e) => report(&e),
    }
    Ok(())
}

/// Print a failed command the way the user needs to see it: status and
/// service message for rejections, the cause otherwise.
fn report(err: &CommandError) {
    match err {
        CommandError::Rejected {
            status,
            url,
            message,
        } => {
            println!("Failed with status code: {}", status);
            println!("url: {}", url);
            if let Some(message) = message {
                println!("Error message: {}", message);
            }
        }
        other => println!("**ERROR: {}", other),
    }
}

/// Show a spinner while `work` runs; it covers retries and backoff sleeps.
fn with_spinner<R>(message: &'static str, work: impl FnOnce() -> R) -> R {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = work();
    spinner.finish_and_clear();
    result
}
