use crate::{
    codegen::{asm::AsmProgram, gen::Generator},
    emitter::emit::Emit,
    error::{CompileError, CompileResult},
    lexer::lex::tokenize_with,
    observe::{handshake, Consumer, Event, Mode, Observer, State},
    parser::recursive_descent::Parser,
    Options,
};
use anyhow::{Context, Result};
use std::thread::{self, JoinHandle};

/// Lex, parse and generate, reporting every checkpoint to `observer`.
pub fn generate_assembly(
    source: &str,
    file: &str,
    options: &Options,
    observer: &mut dyn Observer,
) -> CompileResult<AsmProgram> {
    let tokens = tokenize_with(source, file, &mut *observer)?;
    let mut ast = Parser::new(tokens).with_observer(&mut *observer).parse()?;

    Generator::new(&mut ast, *options, file)
        .with_observer(observer)
        .generate()
}

/// Compile `source` to NASM text. The observer sees a final `finished` or
/// `error` event unless the compilation was cancelled.
pub fn compile(
    source: &str,
    file: &str,
    options: &Options,
    observer: &mut dyn Observer,
) -> Result<String> {
    let program = match generate_assembly(source, file, options, &mut *observer) {
        Ok(program) => program,
        Err(err) => {
            report_failure(&err, observer);
            return Err(err.into());
        }
    };

    let mut out = vec![];
    program.emit(&mut out, options)?;
    let text = String::from_utf8(out).context("emitted assembly is not valid UTF-8")?;

    observer.notify(&Event::new(Mode::Finished, State::Finished).with_text(file))?;
    Ok(text)
}

fn report_failure(err: &CompileError, observer: &mut dyn Observer) {
    if *err == CompileError::Cancelled {
        return;
    }

    let mut event = Event::new(Mode::Error, State::Failed).with_text(err.to_string());
    if let Some(span) = err.span() {
        event = event.at(span);
    }
    let _ = observer.notify(&event);
}

/// Run the pipeline on its own thread. Every event waits for the returned
/// consumer's acknowledgement.
pub fn spawn_worker(
    source: String,
    file: String,
    options: Options,
) -> (JoinHandle<Result<String>>, Consumer) {
    let (mut worker, consumer) = handshake();

    let handle = thread::spawn(move || compile(&source, &file, &options, &mut worker));

    (handle, consumer)
}
