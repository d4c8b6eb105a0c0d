use crate::read_uploads;
use docchat_core::{Session, SessionError, UploadOutcome, UploadedFile};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

const HELP: &str = "commands: /upload <file>... | /dir <folder> | /clear | /history | /quit";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Question(String),
    Upload(Vec<PathBuf>),
    Dir(PathBuf),
    Clear,
    History,
    Help,
    Quit,
    Nothing,
}

fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Nothing;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Question(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("upload") => {
            let paths = parts.map(PathBuf::from).collect::<Vec<_>>();
            if paths.is_empty() {
                Input::Help
            } else {
                Input::Upload(paths)
            }
        }
        Some("dir") => match parts.next() {
            Some(folder) => Input::Dir(PathBuf::from(folder)),
            None => Input::Help,
        },
        Some("clear") => Input::Clear,
        Some("history") => Input::History,
        Some("quit") | Some("exit") => Input::Quit,
        _ => Input::Help,
    }
}

pub async fn run(mut session: Session, initial: Vec<UploadedFile>) -> anyhow::Result<()> {
    if !initial.is_empty() {
        upload(&mut session, initial).await?;
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Input::Nothing => continue,
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::History => session.render_to(&mut std::io::stdout())?,
            Input::Clear => upload(&mut session, Vec::new()).await?,
            Input::Upload(paths) => match read_uploads(&paths, None).await {
                Ok(files) => upload(&mut session, files).await?,
                Err(error) => println!("error: {error}"),
            },
            Input::Dir(folder) => match read_uploads(&[], Some(folder.as_path())).await {
                Ok(files) => upload(&mut session, files).await?,
                Err(error) => println!("error: {error}"),
            },
            Input::Question(question) => match session.ask(&question).await {
                Ok(answer) => println!("assistant> {}", answer.text),
                Err(error) => report(error)?,
            },
        }
    }

    session.close(false).await?;
    Ok(())
}

async fn upload(session: &mut Session, files: Vec<UploadedFile>) -> anyhow::Result<()> {
    match session.upload(files).await {
        Ok(UploadOutcome::Rebuilt {
            documents, chunks, ..
        }) => println!("indexed {documents} document(s) into {chunks} chunk(s)"),
        Ok(UploadOutcome::Unchanged) => println!("files unchanged, keeping the current index"),
        Ok(UploadOutcome::Cleared) => println!("uploads cleared"),
        Err(error) => report(error)?,
    }
    Ok(())
}

fn report(error: SessionError) -> anyhow::Result<()> {
    if error.is_recoverable() {
        warn!(%error, "request failed");
        println!("error: {error}");
        Ok(())
    } else {
        Err(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_questions() {
        assert_eq!(
            parse_line("  what is the pressure? "),
            Input::Question("what is the pressure?".to_string())
        );
        assert_eq!(parse_line("   "), Input::Nothing);
    }

    #[test]
    fn slash_commands_are_parsed() {
        assert_eq!(
            parse_line("/upload a.pdf b.docx"),
            Input::Upload(vec![PathBuf::from("a.pdf"), PathBuf::from("b.docx")])
        );
        assert_eq!(parse_line("/dir docs"), Input::Dir(PathBuf::from("docs")));
        assert_eq!(parse_line("/dir"), Input::Help);
        assert_eq!(parse_line("/upload"), Input::Help);
        assert_eq!(parse_line("/history"), Input::History);
        assert_eq!(parse_line("/quit"), Input::Quit);
        assert_eq!(parse_line("/bogus"), Input::Help);
    }
}
