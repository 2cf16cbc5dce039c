use std::process;

use structopt::StructOpt;

use brainlift::{run, Opt};

fn main() {
    let opt = Opt::from_args();

    match run(&opt) {
        Ok(result) => process::exit(result.exit_code()),
        Err(error) => {
            eprintln!("failed to compile/run program: {}", error);
            process::exit(1);
        }
    }
}
