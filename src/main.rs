use std::fs;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use pratt_parser::lex::TokenMismatchError;
use pratt_parser::parse::NoPrefixError;
use pratt_parser::{Grammar, LexerFactory};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the tokens of an arithmetic file
    Tokenize { filename: PathBuf },
    /// Evaluate every non-blank line of an arithmetic file
    Eval { filename: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Calc {
    Plus,
    Minus,
    Star,
    Slash,
    LeftParen,
    RightParen,
    Number,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    None,
    Sum,
    Product,
}

fn calc_lexer() -> miette::Result<LexerFactory<Calc>> {
    LexerFactory::compile(
        Calc::Eof,
        [
            (Calc::Plus, r"\+"),
            (Calc::Minus, r"\-"),
            (Calc::Star, r"\*"),
            (Calc::Slash, r"/"),
            (Calc::LeftParen, r"\("),
            (Calc::RightParen, r"\)"),
            (Calc::Number, r"[0-9]+"),
        ],
    )
}

fn calc_grammar() -> miette::Result<Grammar<Calc, Level, i64>> {
    Grammar::<Calc, Level, i64>::builder()
        .precedence(Calc::Plus, Level::Sum)
        .precedence(Calc::Minus, Level::Sum)
        .precedence(Calc::Star, Level::Product)
        .precedence(Calc::Slash, Level::Product)
        .natural_order()
        .prefix(Calc::Plus, |p| p.parse_expression(Level::None))
        .prefix(Calc::Minus, |p| {
            let value = p.parse_expression(Level::None)?;
            value
                .checked_neg()
                .ok_or_else(|| miette::miette!("overflow negating {value}"))
        })
        .prefix(Calc::LeftParen, |p| {
            let value = p.parse_expression(Level::None)?;
            p.lexer_mut().expect(Calc::RightParen)?;
            Ok(value)
        })
        .prefix(Calc::Number, |p| {
            let literal = p.lexer().current_value().unwrap_or_default();
            literal
                .parse::<i64>()
                .into_diagnostic()
                .wrap_err_with(|| format!("`{literal}` is not a number"))
        })
        .suffix(Calc::Plus, |p, left| {
            let right = p.parse_expression(Level::Sum)?;
            left.checked_add(right)
                .ok_or_else(|| miette::miette!("overflow adding {right} to {left}"))
        })
        .suffix(Calc::Minus, |p, left| {
            let right = p.parse_expression(Level::Sum)?;
            left.checked_sub(right)
                .ok_or_else(|| miette::miette!("overflow subtracting {right} from {left}"))
        })
        .suffix(Calc::Star, |p, left| {
            let right = p.parse_expression(Level::Product)?;
            left.checked_mul(right)
                .ok_or_else(|| miette::miette!("overflow multiplying {left} by {right}"))
        })
        .suffix(Calc::Slash, |p, left| {
            let right = p.parse_expression(Level::Product)?;
            left.checked_div(right)
                .ok_or_else(|| miette::miette!("division of {left} by {right}"))
        })
        .build()
}

/// Evaluates one line as a whole expression; anything left over is an error.
fn eval_line(
    factory: &LexerFactory<Calc>,
    grammar: &Grammar<Calc, Level, i64>,
    name: &str,
    line: &str,
) -> miette::Result<i64> {
    let mut parser = pratt_parser::Parser::new(factory.named(name, line), grammar);
    let value = parser.parse_expression(Level::None)?;
    parser.lexer_mut().expect(Calc::Eof)?;
    Ok(value)
}

fn main() -> miette::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pratt_parser=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let factory = calc_lexer()?;

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = fs::read_to_string(&filename)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading `{}` failed", filename.display()))?;

            let name = filename.to_string_lossy();
            for token in factory.named(&name, &file_contents) {
                println!("{}", token?);
            }
            println!("{:?} null", factory.eof());
        }
        Commands::Eval { filename } => {
            let file_contents = fs::read_to_string(&filename)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading `{}` failed", filename.display()))?;
            let grammar = calc_grammar()?;

            let name = filename.to_string_lossy();
            let lines = file_contents.lines().enumerate();
            for (index, line) in lines.filter(|(_, line)| !line.trim().is_empty()) {
                let line_number = index + 1;
                match eval_line(&factory, &grammar, &name, line) {
                    Ok(value) => println!("{value}"),
                    Err(e) => {
                        if let Some(no_prefix) = e.downcast_ref::<NoPrefixError>() {
                            eprintln!(
                                "[line {line_number}] Error: unexpected {} in `{line}`",
                                no_prefix.token
                            );
                        } else if let Some(mismatch) = e.downcast_ref::<TokenMismatchError>() {
                            eprintln!(
                                "[line {line_number}] Error: expected {} in `{line}`",
                                mismatch.expected
                            );
                        } else {
                            eprintln!("[line {line_number}] Error: {e}");
                        }
                        eprintln!("{e:?}");
                        std::process::exit(65);
                    }
                }
            }
        }
    }
    Ok(())
}
