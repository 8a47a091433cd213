#![warn(clippy::nursery, clippy::pedantic)]
#![deny(unsafe_code)]

// Burnbin CLI Client
// Copyright (C) 2022  The Burnbin Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use atty::Stream;
use burnbin_common::{
    CreatePaste, DeniedBody, ErrorBody, PasteCreated, PasteUrl, PasteView, Url, PASTES_ENDPOINT,
};
use clap::Parser;
use reqwest::blocking::Client;
use reqwest::StatusCode;

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Parser)]
enum Action {
    Create {
        /// The Burnbin instance to create the paste on.
        url: Url,
        /// Seconds until the paste expires.
        #[clap(short, long)]
        ttl: Option<u64>,
        /// How many times the paste may be viewed.
        #[clap(short, long)]
        max_views: Option<u64>,
        /// File to upload. Reads stdin if omitted.
        path: Option<PathBuf>,
    },
    View {
        /// The paste to view. Viewing uses up one of its views.
        url: PasteUrl,
    },
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    match opts.action {
        Action::Create {
            url,
            ttl,
            max_views,
            path,
        } => handle_create(&url, ttl, max_views, path),
        Action::View { url } => handle_view(&url),
    }?;

    Ok(())
}

fn read_content(path: Option<PathBuf>) -> Result<String> {
    let bytes = match path {
        Some(path) => std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            if atty::is(Stream::Stdin) {
                bail!("Nothing to upload. Pass a file or pipe the paste in.");
            }
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer)?;
            buffer
        }
    };

    String::from_utf8(bytes).context("Pastes must be valid UTF-8")
}

fn handle_create(
    url: &Url,
    ttl_seconds: Option<u64>,
    max_views: Option<u64>,
    path: Option<PathBuf>,
) -> Result<()> {
    let request = CreatePaste {
        content: read_content(path)?,
        ttl_seconds,
        max_views,
    };

    let res = Client::new()
        .post(url.join(PASTES_ENDPOINT)?)
        .json(&request)
        .send()
        .context("Request to server failed")?;

    match res.status() {
        StatusCode::OK => {
            let created: PasteCreated = res.json()?;
            println!("{}", created.url);
            Ok(())
        }
        StatusCode::BAD_REQUEST => {
            let body: ErrorBody = res.json()?;
            bail!("Upload rejected: {}", body.error)
        }
        status => bail!("Upload failed. Got HTTP error {}", status),
    }
}

fn handle_view(url: &PasteUrl) -> Result<()> {
    let res = Client::new()
        .get(url.api_url()?)
        .send()
        .context("Failed to get data")?;

    match res.status() {
        StatusCode::OK => {
            let view: PasteView = res.json()?;
            std::io::stdout().write_all(view.content.as_bytes())?;
            eprintln!("{}", view.lifetime());
            Ok(())
        }
        StatusCode::NOT_FOUND => {
            let body: DeniedBody = res.json()?;
            bail!("{}", body.denied)
        }
        status => bail!("Got bad response from server: {}", status),
    }
}
