use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use movie::Movie;
use recomp::Translator;
use runtime::Player;

#[derive(Parser)]
#[command(name = "swfvm", about = "ActionScript 2.0 movie interpreter and recompiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interpret a movie, writing its trace output to stdout
    Run {
        movie: PathBuf,
        /// Fix the random seed for reproducible runs
        #[arg(long)]
        seed: Option<u32>,
    },
    /// Translate a movie's scripts to C sources
    Translate {
        movie: PathBuf,
        /// Directory for the generated sources
        #[arg(short, long)]
        out: PathBuf,
    },
    /// List a movie's frames and decoded actions
    Disasm { movie: PathBuf },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Run { movie, seed } => {
            let movie = Movie::read_file(movie).map_err(|e| e.to_string())?;
            let stdout = std::io::stdout().lock();
            let mut player = match seed {
                Some(seed) => Player::with_seed(&movie, stdout, seed),
                None => Player::new(&movie, stdout),
            };
            player.run().map_err(|e| e.to_string())
        }
        Command::Translate { movie, out } => {
            let movie = Movie::read_file(movie).map_err(|e| e.to_string())?;
            let translation = Translator::new()
                .translate(&movie)
                .map_err(|e| e.to_string())?;
            translation.write_to(&out).map_err(|e| e.to_string())
        }
        Command::Disasm { movie } => {
            let movie = Movie::read_file(movie).map_err(|e| e.to_string())?;
            disasm(&movie).map_err(|e| e.to_string())
        }
    }
}

fn disasm(movie: &Movie) -> action::Result<()> {
    for (index, frame) in movie.frames().iter().enumerate() {
        match &frame.label {
            Some(label) => println!("frame {index} ({label})"),
            None => println!("frame {index}"),
        }
        for script in &frame.scripts {
            let mut reader = action::Reader::new(script);
            while let Some(decoded) = reader.read_action()? {
                println!("  {:>5}  {:?}", decoded.offset, decoded.action);
            }
        }
    }
    Ok(())
}
