//! Console transport for interventions and interactive job selection.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::mpsc;
use tracing::info;

use super::{Disposition, InterventionError, InterventionRequest, Ticket};
use crate::models::JobRecord;

pub struct ConsoleResponder<R, W> {
    lines: Lines<R>,
    out: W,
}

impl ConsoleResponder<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> ConsoleResponder<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, out: W) -> Self {
        Self {
            lines: reader.lines(),
            out,
        }
    }

    /// Answers tickets until the channel closes or input ends.
    /// A ticket pending at end of input is dropped unanswered.
    pub async fn serve(mut self, mut tickets: mpsc::Receiver<Ticket>) -> Result<(), InterventionError> {
        while let Some(ticket) = tickets.recv().await {
            self.show(&ticket.request).await?;
            match self.ask_disposition().await? {
                Some(disposition) => ticket.resolve(disposition),
                None => {
                    info!("Console input closed; leaving {} unresolved", ticket.request.job_id);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn show(&mut self, request: &InterventionRequest) -> Result<(), InterventionError> {
        let mut text = String::from("\n=== Manual intervention required ===\n");
        text.push_str(&format!("Job:     {}\n", request.job_id));
        if let Some(title) = &request.job_title {
            text.push_str(&format!("Title:   {title}\n"));
        }
        if let Some(company) = &request.company {
            text.push_str(&format!("Company: {company}\n"));
        }
        text.push_str(&format!("Apply:   {}\n", request.application_url));
        if let Some(current) = &request.current_url {
            text.push_str(&format!("Browser: {current}\n"));
        }
        for line in &request.progress {
            text.push_str(&format!("  - {line}\n"));
        }
        if let Some(error) = &request.last_error {
            text.push_str(&format!("Last error: {error}\n"));
        }
        text.push_str("The browser is still open. Finish or abandon the application there.\n");
        self.write(&text).await
    }

    async fn ask_disposition(&mut self) -> Result<Option<Disposition>, InterventionError> {
        loop {
            self.write("Outcome? [s]ubmitted / [c]losed / [f]ailed: ").await?;
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            match line.parse::<Disposition>() {
                Ok(disposition) => return Ok(Some(disposition)),
                Err(message) => self.write(&format!("{message}\n")).await?,
            }
        }
    }

    /// Lists jobs and reads a 1-based choice. `None` on empty input, `q`, or end of input.
    pub async fn choose_job(&mut self, jobs: &[JobRecord]) -> Result<Option<usize>, InterventionError> {
        if jobs.is_empty() {
            self.write("No eligible jobs.\n").await?;
            return Ok(None);
        }
        let mut listing = String::from("\nEligible jobs:\n");
        for (i, job) in jobs.iter().enumerate() {
            listing.push_str(&format!("{:>3}. {} [{}]\n", i + 1, job.display_name(), job.status));
        }
        self.write(&listing).await?;

        loop {
            self.write("Job number (q to quit): ").await?;
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() || line.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            match line.parse::<usize>() {
                Ok(n) if (1..=jobs.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => self.write(&format!("Enter a number between 1 and {}\n", jobs.len())).await?,
            }
        }
    }

    async fn write(&mut self, text: &str) -> Result<(), InterventionError> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.out
    }
}
