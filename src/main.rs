use std::fs::File;
use std::io::{self, BufReader};

use clap::{App, Arg};
use inkwell::context::Context;

use scry::lexer::Lexer;
use scry::session::Session;

fn main() -> anyhow::Result<()> {
    let matches = App::new("scry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("jit-compiled expression language repl")
        .arg(
            Arg::with_name("input")
                .help("source file to run instead of reading stdin")
                .index(1),
        )
        .get_matches();

    let context = Context::create();

    match matches.value_of("input") {
        Some(path) => {
            let file = BufReader::new(File::open(path)?);
            Session::new(&context, Lexer::new(file))?.run()
        }
        None => {
            let stdin = io::stdin();
            let locked = stdin.lock();
            Session::new(&context, Lexer::new(locked))?.run()
        }
    }
}
