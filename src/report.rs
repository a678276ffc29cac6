//! Monthly mood charts.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Once;

use anyhow::Context;
use chrono::{Datelike, Month};
use itertools::Itertools;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontStyle;
use teloxide::types::UserId;

use crate::db::DbUserId;
use crate::models::MoodEntry;
use crate::mood::Mood;
use crate::utils::format_to;

/// Font family charts are drawn with, see [`register_font`].
const FONT_FAMILY: &str = "sans-serif";

const WIDTH: u32 = 900;
const HEIGHT: u32 = 820;
const CENTER: (i32, i32) = (450, 440);
const RADIUS: f64 = 300.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: &impl Datelike) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    pub fn contains(self, date: &impl Datelike) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// English month name, e.g. `May`.
    pub fn name(self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map_or("Unknown", |m| m.name())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) =
            s.trim().split_once('-').context("expected YYYY-MM")?;
        Self::new(year.parse()?, month.parse()?)
            .context("month must be between 1 and 12")
    }
}

/// Mood counts of one user for one month.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonthlyReport {
    pub user_id: UserId,
    pub month: YearMonth,
    /// Moods with a non-zero count, in catalogue id order.
    pub slices: Vec<(Mood, usize)>,
}

impl MonthlyReport {
    pub fn total(&self) -> usize {
        self.slices.iter().map(|(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    #[allow(clippy::cast_precision_loss)] // Counts are small.
    pub fn percentages(&self) -> impl Iterator<Item = (Mood, f64)> + '_ {
        let total = self.total() as f64;
        self.slices
            .iter()
            .map(move |&(mood, count)| (mood, count as f64 * 100.0 / total))
    }

    /// Plain text breakdown, used as the chart caption.
    pub fn summary(&self) -> String {
        let mut text = String::new();
        format_to!(
            text,
            "Your moods for {} {} ({} entries):",
            self.month.name(),
            self.month.year,
            self.total()
        );
        for (mood, percent) in self.percentages() {
            format_to!(text, "\n{mood}: {percent:.1}%");
        }
        text
    }
}

/// Count the entries of `user_id` recorded in `month`, per mood.
pub fn aggregate(
    entries: &[MoodEntry],
    user_id: UserId,
    month: YearMonth,
) -> MonthlyReport {
    let user = DbUserId::from(user_id);
    let counts = entries
        .iter()
        .filter(|e| e.user_id == user && month.contains(&e.recorded_at))
        .filter_map(MoodEntry::category)
        .counts();
    let slices = Mood::ALL
        .iter()
        .filter_map(|mood| counts.get(mood).map(|&count| (*mood, count)))
        .sorted_by_key(|(mood, _)| mood.id())
        .collect();
    MonthlyReport { user_id, month, slices }
}

/// Months in which `user_id` recorded at least one mood, oldest first.
pub fn months_with_entries(
    entries: &[MoodEntry],
    user_id: UserId,
) -> Vec<YearMonth> {
    let user = DbUserId::from(user_id);
    entries
        .iter()
        .filter(|e| e.user_id == user)
        .map(|e| YearMonth::of(&e.recorded_at))
        .sorted()
        .dedup()
        .collect()
}

pub fn chart_path(dir: &Path, report: &MonthlyReport) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}.png",
        report.user_id,
        report.month.name(),
        report.month.year
    ))
}

/// Font for chart text unless `charts.font` overrides it.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

static FONT_REGISTERED: Once = Once::new();

/// Register the bundled font, unless another one was registered already.
fn ensure_font() {
    FONT_REGISTERED.call_once(|| {
        if plotters::style::register_font(
            FONT_FAMILY,
            FontStyle::Normal,
            BUNDLED_FONT,
        )
        .is_err()
        {
            log::error!("Bundled chart font is invalid");
        }
    });
}

/// Draw chart text with the font at `path` instead of the bundled one.
pub fn register_font(path: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read font {}", path.display()))?;
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    plotters::style::register_font(FONT_FAMILY, FontStyle::Normal, bytes)
        .map_err(|_| anyhow::anyhow!("Invalid font {}", path.display()))?;
    FONT_REGISTERED.call_once(|| {});
    Ok(())
}

/// Draw `report` as a pie chart into `dir` and return the file path.
pub fn render(report: &MonthlyReport, dir: &Path) -> anyhow::Result<PathBuf> {
    anyhow::ensure!(!report.is_empty(), "No entries for {}", report.month);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = chart_path(dir, report);
    let root = BitMapBackend::new(&path, (WIDTH, HEIGHT)).into_drawing_area();
    draw(report, &root)
        .map_err(|e| anyhow::anyhow!("Failed to draw chart: {e}"))?;
    drop(root);
    log::debug!("Chart for {} saved to {}", report.user_id, path.display());
    Ok(path)
}

#[allow(clippy::cast_precision_loss)] // Counts are small.
fn draw<DB>(
    report: &MonthlyReport,
    root: &DrawingArea<DB, Shift>,
) -> Result<(), Box<dyn std::error::Error>>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    ensure_font();
    root.fill(&WHITE)?;

    let total = report.total();
    let mut start = -PI / 2.0;
    for &(mood, count) in &report.slices {
        let sweep = TAU * count as f64 / total as f64;
        let color = Palette99::pick(usize::from(mood.id()));
        let points = wedge(start, sweep);
        root.draw(&Polygon::new(points.clone(), color.filled()))?;
        if report.slices.len() > 1 {
            root.draw(&PathElement::new(points, WHITE.stroke_width(2)))?;
        }

        let middle = start + sweep / 2.0;
        let percent = count as f64 * 100.0 / total as f64;
        let centered = TextStyle::from((FONT_FAMILY, 22).into_font())
            .pos(Pos::new(HPos::Center, VPos::Center));
        root.draw(&Text::new(
            format!("{percent:.1}%"),
            polar(middle, RADIUS * 0.65),
            centered.clone(),
        ))?;
        root.draw(&Text::new(
            mood.name(),
            polar(middle, RADIUS * 1.12),
            centered,
        ))?;
        start += sweep;
    }

    let title = TextStyle::from((FONT_FAMILY, 36).into_font())
        .pos(Pos::new(HPos::Center, VPos::Top));
    root.draw(&Text::new(
        format!("{} {}", report.month.name(), report.month.year),
        (CENTER.0, 20),
        title,
    ))?;

    root.present()?;
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // Pixel coordinates.
fn polar(angle: f64, radius: f64) -> (i32, i32) {
    (
        CENTER.0 + (radius * angle.cos()).round() as i32,
        CENTER.1 + (radius * angle.sin()).round() as i32,
    )
}

/// Outline of a pie slice, one point per degree of arc.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn wedge(start: f64, sweep: f64) -> Vec<(i32, i32)> {
    let steps = (sweep.to_degrees().ceil() as usize).max(2);
    let mut points = Vec::with_capacity(steps + 2);
    if sweep < TAU {
        points.push(CENTER);
    }
    points.extend((0..=steps).map(|i| {
        polar(start + sweep * i as f64 / steps as f64, RADIUS)
    }));
    points
}
