use crate::client::ApiClient;
use crate::format::{
    format_change, format_date, format_metric_value, trend_color, trend_symbol,
};
use crate::protocol::{DashboardStats, MetricCard, Period};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Chart, Dataset, GraphType, Paragraph, Tabs};
use ratatui::Frame;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::mpsc;

type DashboardResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Plain-text rendering of a stats snapshot.
pub fn render_report(stats: &DashboardStats, period: Period) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Dashboard: {} ({})", period.label(), period);
    let _ = writeln!(out);

    for (title, card) in stats.metrics.cards() {
        let _ = writeln!(
            out,
            "{:<24} {:>10}  {} {:>7}  {}",
            title,
            format_metric_value(title, card.value),
            trend_symbol(card.trend),
            format_change(card.change_percent),
            card.description
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{:<12} {:>8}", "Date", "Messages");
    for point in &stats.time_series {
        let _ = writeln!(out, "{:<12} {:>8}", point.date.format("%Y-%m-%d"), point.value);
    }
    out
}

#[derive(Debug)]
pub enum DashboardEvent {
    Loaded {
        period: Period,
        result: Result<DashboardStats, String>,
    },
}

/// Dashboard state and drawing, independent of the terminal loop.
#[derive(Debug, Default)]
pub struct DashboardView {
    period: Period,
    stats: Option<DashboardStats>,
    error: Option<String>,
    loading: bool,
}

impl DashboardView {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn stats(&self) -> Option<&DashboardStats> {
        self.stats.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Switches period; returns true when a fetch is needed.
    pub fn select(&mut self, period: Period) -> bool {
        if period == self.period && (self.stats.is_some() || self.loading) {
            return false;
        }
        self.period = period;
        self.loading = true;
        true
    }

    pub fn begin_refresh(&mut self) {
        self.loading = true;
    }

    pub fn apply(&mut self, event: DashboardEvent) {
        match event {
            DashboardEvent::Loaded { period, result } => {
                // A slower fetch for a period the user already left.
                if period != self.period {
                    return;
                }
                self.loading = false;
                match result {
                    Ok(stats) => {
                        self.stats = Some(stats);
                        self.error = None;
                    }
                    Err(err) => self.error = Some(err),
                }
            }
        }
    }

    pub fn draw(&self, f: &mut Frame) {
        let [header, cards, chart, footer] = Layout::vertical([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .areas(f.area());

        self.draw_period_selector(f, header);

        match &self.stats {
            Some(stats) => {
                let columns = Layout::horizontal([Constraint::Ratio(1, 3); 3]).split(cards);
                for ((title, card), area) in stats.metrics.cards().into_iter().zip(columns.iter())
                {
                    draw_card(f, *area, title, card);
                }
                draw_chart(f, chart, stats);
            }
            None => {
                let text = if self.loading { "Loading..." } else { "No data" };
                let placeholder = Paragraph::new(text)
                    .style(Style::default().fg(Color::DarkGray))
                    .block(Block::bordered());
                f.render_widget(placeholder, cards.union(chart));
            }
        }

        let status = match (&self.error, self.loading) {
            (Some(err), _) => Line::from(Span::styled(
                format!(" {err}"),
                Style::default().fg(Color::Red),
            )),
            (None, true) => Line::from(Span::styled(
                " Refreshing...",
                Style::default().fg(Color::DarkGray),
            )),
            (None, false) => Line::from(Span::styled(
                " 1/2/3 or Tab: period   r: refresh   q/Esc: quit",
                Style::default().fg(Color::DarkGray),
            )),
        };
        f.render_widget(Paragraph::new(status), footer);
    }

    fn draw_period_selector(&self, f: &mut Frame, area: Rect) {
        let selected = Period::ALL
            .iter()
            .position(|p| *p == self.period)
            .unwrap_or(0);
        let tabs = Tabs::new(Period::ALL.iter().map(|p| p.label()))
            .select(selected)
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
            .block(Block::bordered().title(" Dashboard "));
        f.render_widget(tabs, area);
    }
}

fn draw_card(f: &mut Frame, area: Rect, title: &str, card: &MetricCard) {
    let color = trend_color(card.trend);
    let lines = vec![
        Line::from(Span::styled(
            format_metric_value(title, card.value),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!(
                "{} {}",
                trend_symbol(card.trend),
                format_change(card.change_percent)
            ),
            Style::default().fg(color),
        )),
        Line::from(Span::styled(
            card.description.clone(),
            Style::default().fg(Color::Gray),
        )),
    ];

    let paragraph = Paragraph::new(lines).block(Block::bordered().title(format!(" {title} ")));
    f.render_widget(paragraph, area);
}

fn draw_chart(f: &mut Frame, area: Rect, stats: &DashboardStats) {
    let points: Vec<(f64, f64)> = stats
        .time_series
        .iter()
        .enumerate()
        .map(|(i, point)| (i as f64, point.value as f64))
        .collect();

    let block = Block::bordered().title(" Messages per day ");
    let (Some(first), Some(last)) = (stats.time_series.first(), stats.time_series.last()) else {
        f.render_widget(Paragraph::new("No data").block(block), area);
        return;
    };

    let max_value = stats
        .time_series
        .iter()
        .map(|point| point.value)
        .max()
        .unwrap_or(0) as f64;
    let y_max = (max_value * 1.1).max(1.0);
    let x_max = (points.len().saturating_sub(1)).max(1) as f64;
    let middle = &stats.time_series[stats.time_series.len() / 2];

    let dataset = Dataset::default()
        .name("Messages")
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .block(block)
        .x_axis(
            Axis::default()
                .bounds([0.0, x_max])
                .labels(vec![
                    format_date(first.date),
                    format_date(middle.date),
                    format_date(last.date),
                ])
                .style(Style::default().fg(Color::Gray)),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, y_max])
                .labels(vec!["0".to_string(), format!("{:.0}", y_max)])
                .style(Style::default().fg(Color::Gray)),
        );
    f.render_widget(chart, area);
}

fn spawn_fetch(client: &ApiClient, period: Period, sender: &mpsc::Sender<DashboardEvent>) {
    let client = client.clone();
    let sender = sender.clone();
    tokio::spawn(async move {
        let result = client.fetch_stats(period).await.map_err(|err| {
            tracing::warn!(error = %err, %period, "stats fetch failed");
            err.to_string()
        });
        let _ = sender.send(DashboardEvent::Loaded { period, result }).await;
    });
}

// Restores the terminal even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        ratatui::restore();
    }
}

/// Runs the full-screen dashboard until the user quits.
pub fn run_dashboard(client: ApiClient, period: Period) -> DashboardResult<()> {
    let (sender, mut receiver) = mpsc::channel(16);
    let mut view = DashboardView::new(period);
    view.begin_refresh();
    spawn_fetch(&client, period, &sender);

    let mut terminal = ratatui::try_init()?;
    let _guard = TerminalGuard;

    loop {
        while let Ok(event) = receiver.try_recv() {
            view.apply(event);
        }
        terminal.draw(|f| view.draw(f))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let requested = match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char('1') => Some(Period::Week),
            KeyCode::Char('2') => Some(Period::Month),
            KeyCode::Char('3') => Some(Period::Quarter),
            KeyCode::Tab => Some(view.period().next()),
            KeyCode::Char('r') => {
                view.begin_refresh();
                spawn_fetch(&client, view.period(), &sender);
                None
            }
            _ => None,
        };

        if let Some(period) = requested {
            if view.select(period) {
                spawn_fetch(&client, period, &sender);
            }
        }
    }

    Ok(())
}
