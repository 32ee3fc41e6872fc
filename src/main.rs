use std::{fs::File, io::Write, path::PathBuf};

use anyhow::{bail, Context, Result};
use structopt::StructOpt;

use minic::driver::{compile, spawn_worker};
use minic::lexer::lex::tokenize;
use minic::observe::Silent;
use minic::parser::recursive_descent::parse;
use minic::Options;

fn main() {
    let opts = Opt::from_args();
    if let Err(e) = run(&opts) {
        eprintln!("minic: {}", e);
        std::process::exit(1);
    }
}

fn run(opts: &Opt) -> Result<()> {
    let src = std::fs::read_to_string(&opts.input)
        .with_context(|| format!("cannot read {}", opts.input.display()))?;
    let file = opts.input.display().to_string();

    if opts.lex {
        for token in tokenize(&src, &file)? {
            println!("{} {:?} {:?}", token.span, token.kind, token.value);
        }
        return Ok(());
    }

    if opts.parse {
        let ast = parse(tokenize(&src, &file)?)?;
        if let Some(root) = ast.root() {
            print!("{}", ast.render(root));
        }
        return Ok(());
    }

    let options = Options {
        comments: !opts.no_comments,
        ..Options::default()
    };

    let asm = if opts.no_ui {
        compile(&src, &file, &options, &mut Silent)?
    } else {
        trace(src, file, options)?
    };

    let mut f = File::create(&opts.output)
        .with_context(|| format!("cannot create {}", opts.output.display()))?;
    f.write_all(asm.as_bytes())?;

    Ok(())
}

/// Compile on a worker thread, printing each event as it is acknowledged.
fn trace(src: String, file: String, options: Options) -> Result<String> {
    let (worker, consumer) = spawn_worker(src, file, options);

    while let Some(event) = consumer.recv() {
        eprintln!("{}", event);
        consumer.acknowledge();
    }

    match worker.join() {
        Ok(result) => result,
        Err(_) => bail!("compiler worker panicked"),
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "minic", about = "Compile a minic source file to NASM x86-64")]
struct Opt {
    #[structopt(short = "i", parse(from_os_str))]
    input: PathBuf,

    #[structopt(short = "o", parse(from_os_str))]
    output: PathBuf,

    #[structopt(name = "no-ui", long)]
    no_ui: bool,

    #[structopt(name = "lex", long)]
    lex: bool,

    #[structopt(name = "parse", long)]
    parse: bool,

    #[structopt(name = "no-comments", long)]
    no_comments: bool,
}
