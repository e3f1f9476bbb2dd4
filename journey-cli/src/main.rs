use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use journey_core::{build_timeline, CanonicalTable, MetricCategory, MetricDictionary};
use journey_ingest::chat::ChatCompletionMapper;
use journey_ingest::source::{read_dictionary_str, read_table_str, write_csv, write_json, InputFormat};
use journey_ingest::template::{canonical_template, list_metrics, TemplateMetrics, TemplateOptions};
use journey_ingest::{IngestConfig, IngestOptions, IngestOutcome, Pipeline};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "journey-cli",
    version,
    about = "Chuẩn hóa bảng lịch sử điều trị ung thư và dựng timeline."
)]
struct Cli {
    /// Ghi log chi tiết (mức debug) ra stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chuẩn hóa một hoặc nhiều file bảng (JSON/CSV) về bố cục chuẩn.
    Ingest(IngestArgs),
    /// Dựng timeline từ bảng đã ở bố cục chuẩn.
    Timeline(TimelineArgs),
    /// Tạo bảng chuẩn trống để nhập tay.
    Template(TemplateArgs),
    /// Liệt kê các chỉ số trong từ điển.
    Metrics(MetricsArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Các file đầu vào; mỗi file được xử lý độc lập.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Thư mục ghi kết quả; bỏ trống thì chỉ in tóm tắt.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TableFormat::Csv)]
    format: TableFormat,

    #[arg(long)]
    patient_name: Option<String>,

    #[arg(long)]
    subject_id: Option<String>,

    /// Chỉ số cột ngày (bắt đầu từ 0), ưu tiên cao nhất.
    #[arg(long)]
    date_column: Option<usize>,

    /// Tên tiêu đề cột ngày.
    #[arg(long)]
    date_header: Option<String>,

    #[command(flatten)]
    shared: SharedArgs,

    /// Endpoint OpenAI-compatible của dịch vụ ánh xạ cột.
    #[arg(long)]
    mapper_url: Option<String>,

    #[arg(long, default_value = "qwen-plus")]
    mapper_model: String,

    /// Biến môi trường chứa API key của dịch vụ ánh xạ.
    #[arg(long, default_value = "JOURNEY_MAPPER_API_KEY")]
    api_key_env: String,
}

#[derive(Args, Debug)]
struct TimelineArgs {
    /// Bảng chuẩn (JSON hoặc CSV).
    input: PathBuf,

    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Args, Debug)]
struct SharedArgs {
    /// File cấu hình JSON; trường thiếu lấy giá trị mặc định.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    dictionary: DictionaryArgs,
}

#[derive(Args, Debug)]
struct DictionaryArgs {
    /// Bổ sung CYFRA21-1, NSE, SCC vào từ điển.
    #[arg(long, conflicts_with = "dictionary")]
    extended_dictionary: bool,

    /// Thay từ điển chuẩn bằng danh sách định nghĩa chỉ số (JSON).
    #[arg(long)]
    dictionary: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TemplateArgs {
    #[arg(long)]
    patient_name: Option<String>,

    /// Chỉ gồm Weight, ECOG, MRD, CEA, CA125, AFP.
    #[arg(long, conflicts_with_all = ["category", "metrics"])]
    minimal: bool,

    #[arg(long, value_enum, conflicts_with = "metrics")]
    category: Option<CategoryArg>,

    /// Danh sách chỉ số, phân tách bằng dấu phẩy.
    #[arg(long, value_delimiter = ',')]
    metrics: Option<Vec<String>>,

    #[arg(long, default_value_t = 20)]
    rows: usize,

    #[arg(long, value_enum, default_value_t = TableFormat::Csv)]
    format: TableFormat,

    /// File kết quả; bỏ trống thì in ra stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MetricsArgs {
    #[command(flatten)]
    dictionary: DictionaryArgs,

    /// In dạng JSON thay vì bảng chữ.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TableFormat {
    Csv,
    Json,
}

impl TableFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    fn render(self, table: &CanonicalTable) -> anyhow::Result<String> {
        let text = match self {
            Self::Csv => write_csv(table)?,
            Self::Json => write_json(table)?,
        };
        Ok(text)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CategoryArg {
    Performance,
    Molecular,
    Imaging,
    SideEffects,
    Custom,
}

impl From<CategoryArg> for MetricCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Performance => MetricCategory::Performance,
            CategoryArg::Molecular => MetricCategory::Molecular,
            CategoryArg::Imaging => MetricCategory::Imaging,
            CategoryArg::SideEffects => MetricCategory::SideEffects,
            CategoryArg::Custom => MetricCategory::Custom,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Ingest(args) => run_ingest(args).await,
        Command::Timeline(args) => run_timeline(&args),
        Command::Template(args) => run_template(&args),
        Command::Metrics(args) => run_metrics(&args),
    }
}

impl DictionaryArgs {
    fn load(&self) -> anyhow::Result<MetricDictionary> {
        if let Some(path) = &self.dictionary {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Không đọc được file từ điển {path:?}"))?;
            return read_dictionary_str(&data)
                .with_context(|| format!("Từ điển không hợp lệ: {path:?}"));
        }
        Ok(if self.extended_dictionary {
            MetricDictionary::with_dynamic_markers()
        } else {
            MetricDictionary::standard()
        })
    }
}

impl SharedArgs {
    fn config(&self) -> anyhow::Result<IngestConfig> {
        let Some(path) = &self.config else {
            return Ok(IngestConfig::default());
        };
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Không đọc được file cấu hình {path:?}"))?;
        serde_json::from_str(&data).with_context(|| format!("Cấu hình không hợp lệ: {path:?}"))
    }
}

fn read_input(path: &Path) -> anyhow::Result<journey_core::RawTable> {
    let format = InputFormat::from_path(path)?;
    let data =
        std::fs::read_to_string(path).with_context(|| format!("Không đọc được file {path:?}"))?;
    let table = read_table_str(&data, format).with_context(|| format!("Bảng không hợp lệ: {path:?}"))?;
    Ok(table)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string())
}

/// Ghi bảng chuẩn, timeline và danh sách quan sát cạnh nhau trong `out_dir`.
fn write_outcome(
    out_dir: &Path,
    stem: &str,
    outcome: &IngestOutcome,
    format: TableFormat,
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Không tạo được thư mục {out_dir:?}"))?;

    let files = [
        (
            out_dir.join(format!("{stem}.canonical.{}", format.extension())),
            format.render(&outcome.canonical)?,
        ),
        (
            out_dir.join(format!("{stem}.timeline.json")),
            serde_json::to_string_pretty(&outcome.timeline)?,
        ),
        (
            out_dir.join(format!("{stem}.observations.json")),
            serde_json::to_string_pretty(&outcome.observations)?,
        ),
        (
            out_dir.join(format!("{stem}.warnings.json")),
            serde_json::to_string_pretty(&outcome.warnings)?,
        ),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (path, contents) in files {
        std::fs::write(&path, contents).with_context(|| format!("Không ghi được {path:?}"))?;
        written.push(path);
    }
    Ok(written)
}

fn summary_line(path: &Path, outcome: &IngestOutcome) -> String {
    format!(
        "{}: {} hàng dữ liệu, {} giai đoạn, {} sự kiện, {} chỉ số, {} cảnh báo{}",
        path.display(),
        outcome.canonical.data_rows().len(),
        outcome.timeline.phases.len(),
        outcome.timeline.events.len(),
        outcome.timeline.series.len(),
        outcome.warnings.len(),
        if outcome.was_canonical() {
            " (đã ở bố cục chuẩn)"
        } else {
            ""
        }
    )
}

async fn run_ingest(args: IngestArgs) -> anyhow::Result<()> {
    let dictionary = args.shared.dictionary.load()?;
    let config = args.shared.config()?;

    let mut pipeline = Pipeline::new(dictionary.clone(), config);
    if let Some(url) = &args.mapper_url {
        let api_key = std::env::var(&args.api_key_env).ok();
        if api_key.is_none() {
            warn!(env = %args.api_key_env, "mapper API key not set, calling without auth");
        }
        let mapper = ChatCompletionMapper::new(url.as_str(), api_key, args.mapper_model.as_str(), &dictionary);
        pipeline = pipeline.with_mapper(Arc::new(mapper));
    }
    let pipeline = Arc::new(pipeline);

    let options = IngestOptions {
        patient_name: args.patient_name.clone(),
        subject_id: args.subject_id.clone(),
        date_column: args.date_column,
        date_header: args.date_header.clone(),
    };

    let mut tasks = Vec::with_capacity(args.inputs.len());
    for path in args.inputs.iter().cloned() {
        let pipeline = Arc::clone(&pipeline);
        let options = options.clone();
        tasks.push(tokio::spawn(async move {
            let table = read_input(&path)?;
            let outcome = pipeline.ingest(&table, &options).await?;
            anyhow::Ok((path, outcome))
        }));
    }

    let total = tasks.len();
    let mut failed = 0usize;
    for (task, input) in tasks.into_iter().zip(&args.inputs) {
        let result = task
            .await
            .with_context(|| format!("Tác vụ xử lý {input:?} bị hủy"))?;
        match result {
            Ok((path, outcome)) => {
                for warning in &outcome.warnings {
                    warn!(file = %path.display(), "{warning}");
                }
                println!("{}", summary_line(&path, &outcome));
                if let Some(out_dir) = &args.out_dir {
                    for written in write_outcome(out_dir, &file_stem(&path), &outcome, args.format)? {
                        info!(path = %written.display(), "output written");
                    }
                }
            }
            Err(err) => {
                failed += 1;
                eprintln!("{}: lỗi: {err:#}", input.display());
            }
        }
    }

    println!("Đã xử lý {}/{} file", total - failed, total);
    if failed > 0 {
        bail!("{failed} file xử lý thất bại");
    }
    Ok(())
}

fn run_timeline(args: &TimelineArgs) -> anyhow::Result<()> {
    let dictionary = args.shared.dictionary.load()?;
    let config = args.shared.config()?;
    let table = CanonicalTable::new(read_input(&args.input)?.rows);

    let timeline = build_timeline(&table, &dictionary, &config.timeline);
    if timeline.is_empty() {
        warn!(file = %args.input.display(), "no dated rows, timeline is empty");
    }
    println!("{}", serde_json::to_string_pretty(&timeline)?);
    Ok(())
}

fn template_options(args: &TemplateArgs) -> TemplateOptions {
    let metrics = if args.minimal {
        TemplateMetrics::Minimal
    } else if let Some(category) = args.category {
        TemplateMetrics::Category(category.into())
    } else if let Some(names) = &args.metrics {
        TemplateMetrics::Named(names.clone())
    } else {
        TemplateMetrics::All
    };
    TemplateOptions {
        patient_name: args.patient_name.clone(),
        metrics,
        empty_rows: args.rows,
    }
}

fn run_template(args: &TemplateArgs) -> anyhow::Result<()> {
    let table = canonical_template(&MetricDictionary::standard(), &template_options(args));
    let text = args.format.render(&table)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("Không ghi được {path:?}"))?;
            info!(path = %path.display(), "template written");
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn run_metrics(args: &MetricsArgs) -> anyhow::Result<()> {
    let listing = list_metrics(&args.dictionary.load()?);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    for metric in listing {
        println!(
            "{:<16} {:<18} {:<8} {}",
            metric.canonical_name, metric.display_name, metric.category_label, metric.unit
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_fixture() -> journey_core::RawTable {
        use journey_core::Cell;

        let options = TemplateOptions {
            metrics: TemplateMetrics::Minimal,
            empty_rows: 0,
            ..TemplateOptions::default()
        };
        let mut rows = canonical_template(&MetricDictionary::standard(), &options).rows;
        for (serial, cycle, cea) in [(45449.0, "C1D1", 3.2), (45470.0, "C2D1", 6.4)] {
            let mut row = vec![
                Cell::Number(serial),
                Cell::text("化疗"),
                Cell::text(cycle),
                Cell::Empty,
                Cell::text("TC"),
                Cell::Empty,
                Cell::Empty,
            ];
            row.extend([52.0, 1.0, 0.1, cea, 20.0, 3.0].map(Cell::Number));
            rows.push(row);
        }
        journey_core::RawTable::new(rows)
    }

    #[test]
    fn outcome_files_land_in_out_dir() {
        let dir = tempfile::tempdir().expect("Không tạo được thư mục tạm");
        let pipeline = Pipeline::new(MetricDictionary::standard(), IngestConfig::default());
        let outcome = pipeline
            .ingest_offline(&canonical_fixture(), &IngestOptions::default())
            .expect("Không xử lý được bảng chuẩn");

        let written = write_outcome(dir.path(), "sample", &outcome, TableFormat::Csv)
            .expect("Không ghi được kết quả");
        assert_eq!(written.len(), 4);

        let csv = std::fs::read_to_string(dir.path().join("sample.canonical.csv"))
            .expect("Thiếu file CSV");
        assert!(csv.starts_with("肿瘤病程周期表"));
        assert!(dir.path().join("sample.timeline.json").exists());
    }

    #[test]
    fn input_format_follows_extension() {
        let dir = tempfile::tempdir().expect("Không tạo được thư mục tạm");
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, "日期,体重\n2024-06-06,52\n").expect("Không ghi được CSV");
        let table = read_input(&path).expect("Không đọc được CSV");
        assert_eq!(table.len(), 2);

        let unknown = dir.path().join("rows.xlsx");
        std::fs::write(&unknown, "").expect("Không ghi được file");
        assert!(read_input(&unknown).is_err());
    }

    fn template_args(extra: &[&str]) -> TemplateArgs {
        let argv = ["journey-cli", "template"].into_iter().chain(extra.iter().copied());
        match Cli::parse_from(argv).command {
            Command::Template(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn template_flags_pick_metric_set() {
        let options = template_options(&template_args(&["--minimal", "--rows", "3"]));
        assert_eq!(options.metrics, TemplateMetrics::Minimal);
        assert_eq!(options.empty_rows, 3);

        let options = template_options(&template_args(&["--metrics", "CEA,AFP"]));
        assert_eq!(
            options.metrics,
            TemplateMetrics::Named(vec!["CEA".to_string(), "AFP".to_string()])
        );

        let options = template_options(&template_args(&["--category", "side-effects"]));
        assert_eq!(options.metrics, TemplateMetrics::Category(MetricCategory::SideEffects));
    }
}
