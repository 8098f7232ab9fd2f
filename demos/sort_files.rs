use std::env;
use std::io::{self, prelude::*};
use std::process;

use line_ext_sort::{ExternalSorterBuilder, FileChunk};

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .format_timestamp_millis()
        .init();

    let chunks: Vec<FileChunk> = env::args().skip(1).map(FileChunk::new).collect();
    if chunks.is_empty() {
        log::error!("usage: sort_files <chunk>...");
        process::exit(2);
    }

    let sorter = match ExternalSorterBuilder::new().build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let stdout = io::stdout();
    let mut output_stream = io::BufWriter::new(stdout.lock());

    if let Err(err) = sorter.sort(&mut output_stream, &chunks) {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }

    if let Err(err) = output_stream.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }
}
