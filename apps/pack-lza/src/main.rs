// This file is part of Minipack.
//
// Minipack is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Minipack is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Minipack.  If not, see <http://www.gnu.org/licenses/>.

// Compress and expand files with the LZA codec.
use anyhow::{bail, ensure, Result};
use humansize::{format_size, BINARY};
use lza::CompressedSizes;
use std::{fs, path::PathBuf};
use structopt::StructOpt;

// The codec itself is headerless; files need a carrier for the sizes the
// decompressor is handed out-of-band (inside a packed executable the
// loader layout carries them).
const MAGIC: &[u8; 4] = b"LZA1";
const HEADER_SIZE: usize = 12;

#[derive(Debug, StructOpt)]
#[structopt(name = "pack-lza")]
/// Compress and expand files with the LZA codec
enum Opt {
    #[structopt(name = "pack")]
    /// Compress files
    Pack {
        #[structopt(short = "-w", long = "--window-size", default_value = "128")]
        /// Adaptation window of the arithmetic coder, 1 to 2048 bits
        window_size: u32,

        #[structopt(parse(from_os_str))]
        /// The files to compress (each gets an .lza sibling)
        inputs: Vec<PathBuf>,
    },

    #[structopt(name = "unpack")]
    /// Expand previously packed files
    Unpack {
        #[structopt(short = "-o", long = "--output", parse(from_os_str))]
        /// Write the expanded file here instead of next to the input
        output_path: Option<PathBuf>,

        #[structopt(parse(from_os_str))]
        /// The .lza files to expand
        inputs: Vec<PathBuf>,
    },

    #[structopt(name = "test")]
    /// Compress in memory, verify the round trip and print statistics
    Test {
        #[structopt(short = "-w", long = "--window-size", default_value = "128")]
        /// Adaptation window of the arithmetic coder, 1 to 2048 bits
        window_size: u32,

        #[structopt(parse(from_os_str))]
        /// The files to verify
        inputs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    match opt {
        Opt::Pack {
            window_size,
            inputs,
        } => handle_pack(inputs, window_size),
        Opt::Unpack {
            inputs,
            output_path,
        } => handle_unpack(inputs, output_path),
        Opt::Test {
            window_size,
            inputs,
        } => handle_test(inputs, window_size),
    }
}

fn handle_pack(inputs: Vec<PathBuf>, window_size: u32) -> Result<()> {
    for input in &inputs {
        let data = fs::read(input)?;
        ensure!(
            data.len() <= u32::MAX as usize,
            "{}: too large to pack",
            input.to_string_lossy()
        );

        let packed = lza::compress(&data, window_size)?;

        let mut out = Vec::with_capacity(HEADER_SIZE + packed.data.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(packed.sizes.lz as u32).to_le_bytes());
        out.extend_from_slice(&packed.data);

        let mut output = input.clone();
        let mut name = output
            .file_name()
            .expect("no filename in input")
            .to_os_string();
        name.push(".lza");
        output.set_file_name(name);

        fs::write(&output, &out)?;

        println!(
            "{} -> {}: {} -> {}",
            input.to_string_lossy(),
            output.to_string_lossy(),
            format_size(data.len(), BINARY),
            format_size(out.len(), BINARY),
        );
    }

    Ok(())
}

fn handle_unpack(inputs: Vec<PathBuf>, output_path: Option<PathBuf>) -> Result<()> {
    for input in &inputs {
        let packed = fs::read(input)?;
        ensure!(
            packed.len() >= HEADER_SIZE && &packed[0..4] == MAGIC,
            "{}: not a pack-lza file",
            input.to_string_lossy()
        );

        let orig_size = u32::from_le_bytes(packed[4..8].try_into()?) as usize;
        let lz_size = u32::from_le_bytes(packed[8..12].try_into()?) as usize;

        let data = lza::decompress(&packed[HEADER_SIZE..], orig_size, lz_size)?;

        let output = if let Some(path) = &output_path {
            path.clone()
        } else {
            let name = input
                .file_name()
                .expect("no filename in input")
                .to_string_lossy()
                .into_owned();
            match name.strip_suffix(".lza") {
                Some(stripped) if !stripped.is_empty() => input.with_file_name(stripped),
                _ => bail!(
                    "{}: no .lza suffix to strip, use --output",
                    input.to_string_lossy()
                ),
            }
        };

        fs::write(&output, &data)?;

        println!(
            "{} -> {}: {}",
            input.to_string_lossy(),
            output.to_string_lossy(),
            format_size(data.len(), BINARY),
        );
    }

    Ok(())
}

fn handle_test(inputs: Vec<PathBuf>, window_size: u32) -> Result<()> {
    for input in &inputs {
        let data = fs::read(input)?;

        let packed = lza::compress(&data, window_size)?;
        let restored = lza::decompress(&packed.data, data.len(), packed.sizes.lz)?;
        ensure!(
            restored == data,
            "{}: decompressed output doesn't match input data",
            input.to_string_lossy()
        );

        println!("{}:", input.to_string_lossy());
        print_stats(data.len(), &packed.sizes);
    }

    Ok(())
}

fn print_stats(original: usize, sizes: &CompressedSizes) {
    let percent = if original > 0 {
        sizes.compressed * 100 / original
    } else {
        0
    };

    println!("Original    {:>12}", format_size(original, BINARY));
    println!("LZ          {:>12}", format_size(sizes.lz, BINARY));
    println!(
        "Entropy     {:>12} ({}%)",
        format_size(sizes.compressed, BINARY),
        percent
    );
    println!("LIT         {:>8}", sizes.lit_packets);
    println!("MATCH       {:>8}", sizes.match_packets);
    println!("SHORTREP    {:>8}", sizes.shortrep_packets);
    for (slot, count) in sizes.longrep_packets.iter().enumerate() {
        println!("LONGREP{}    {:>8}", slot, count);
    }
}
