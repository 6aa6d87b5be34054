use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

pub fn with_spinner<T, E, F>(message: &str, action: F) -> Result<T, E>
where
    F: FnOnce(&ProgressBar) -> Result<T, E>,
{
    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("/|\\- "),
    );
    spinner.set_message(message.to_string());

    let result = action(&spinner);
    match &result {
        Ok(_) => spinner.finish_with_message(format!("{message} done")),
        Err(_) => spinner.finish_and_clear(),
    }
    result
}
