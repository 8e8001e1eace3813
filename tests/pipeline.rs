// End-to-end runs against an in-memory warehouse and a generated CSV.

use rust_decimal::Decimal;
use star_etl::tables::{DIM_CUSTOMER, DIM_PRODUCT, FACT_SALES, PROCESSED_SALES, RAW_SALES};
use star_etl::{
    Filter, LocalDatasetSource, Pipeline, PipelineConfig, PipelineError, RawInput, Sink,
    SqliteSink, SENTINEL_KEY,
};
use std::fs;
use std::path::PathBuf;

const DATASET: &str = "carrie1/ecommerce-data";
const FILE: &str = "ecommerce_data.csv";

const CSV: &str = "\
InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country
536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,3,12/1/2010 8:26,2.50,17850,United Kingdom
536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,3,12/1/2010 8:26,2.50,17850,United Kingdom
536366,22633,HAND WARMER UNION JACK,6,12/1/2010 8:28,1.85,,United Kingdom
536367,84879,ASSORTED COLOUR BIRD ORNAMENT,32,12/1/2010 8:34,1.69,13047,France
C536379,D,Discount,-1,12/1/2010 9:41,27.50,14527,United Kingdom
,22727,ALARM CLOCK BAKELIKE RED,2,12/2/2010 10:00,3.75,13047,France
536370,22728,ALARM CLOCK BAKELIKE PINK,24,12/2/2010 8:45,3.75,12583,France
";

struct Fixture {
    root: PathBuf,
    config: PipelineConfig,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("star-etl-{}-{}", name, uuid::Uuid::new_v4()));
        let dataset_dir = root.join("data").join(DATASET);
        fs::create_dir_all(&dataset_dir).unwrap();
        fs::write(dataset_dir.join(FILE), CSV).unwrap();

        let mut config = PipelineConfig::default();
        config.dataset.identifier = DATASET.to_string();
        config.dataset.file_name = Some(FILE.to_string());
        config.dataset.data_dir = root.join("data");
        config.output_dir = root.join("output");
        config.chunk_size = 2;

        Fixture { root, config }
    }

    fn pipeline(&self) -> Pipeline<SqliteSink, LocalDatasetSource> {
        let sink = SqliteSink::open_in_memory(&self.config.schemas.all()).unwrap();
        let source = LocalDatasetSource::new(self.config.dataset.data_dir.clone());
        Pipeline::new(self.config.clone(), sink, source)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[test]
fn test_full_run_builds_star_schema() {
    let fixture = Fixture::new("full");
    let mut pipeline = fixture.pipeline();

    let outcome = pipeline.run(RawInput::Fetch).unwrap();
    let summary = &outcome.summary;

    assert_eq!(summary.raw_rows, 7);
    assert_eq!(summary.rows_dropped, 2);
    assert_eq!(summary.rows_invalid, 1);
    assert_eq!(summary.rows_valid, 4);
    assert_eq!(summary.processed_rows, 5);
    assert_eq!(summary.facts_written, 5);
    assert_eq!(summary.facts_skipped, 0);
    assert!(outcome.quality.reconciles());
    assert!(outcome.validation.passed(), "{:?}", outcome.validation.failures());

    let sink = pipeline.sink();
    let schemas = &fixture.config.schemas;

    // Duplicate pair collapses to one line and one product row
    let hearts = sink
        .read(&schemas.processed, &PROCESSED_SALES, Some(&Filter::eq("stock_code", "85123A")))
        .unwrap();
    assert_eq!(hearts.len(), 1);
    assert_eq!(hearts[0]["total_amount"].as_decimal(), Some(Decimal::new(750, 2)));
    assert_eq!(
        sink.count(&schemas.warehouse, &DIM_PRODUCT, Some(&Filter::eq("stock_code", "85123A")))
            .unwrap(),
        1
    );

    // Missing customer stays valid and lands on the sentinel key
    let warmers = sink
        .read(&schemas.processed, &PROCESSED_SALES, Some(&Filter::eq("stock_code", "22633")))
        .unwrap();
    assert_eq!(warmers[0]["customer_segment"].as_str(), Some("unknown"));
    assert_eq!(warmers[0]["is_valid"].as_bool(), Some(true));
    let fingerprint = warmers[0]["line_fingerprint"].as_str().unwrap().to_string();
    let facts = sink
        .read(&schemas.warehouse, &FACT_SALES, Some(&Filter::eq("line_fingerprint", fingerprint)))
        .unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0]["customer_key"].as_i64(), Some(SENTINEL_KEY));

    // Refund line is retained but flagged
    let refunds = sink
        .read(&schemas.warehouse, &FACT_SALES, Some(&Filter::eq("invoice_no", "C536379")))
        .unwrap();
    assert_eq!(refunds[0]["is_valid"].as_bool(), Some(false));

    assert_eq!(
        sink.count(&schemas.raw, &RAW_SALES, Some(&Filter::eq("run_id", summary.run_id.as_str())))
            .unwrap(),
        7
    );

    let revalidated = pipeline.validate_only().unwrap();
    assert!(revalidated.passed(), "{:?}", revalidated.failures());
    assert_eq!(revalidated.run_id.as_deref(), Some(summary.run_id.as_str()));
}

#[test]
fn test_rerun_is_idempotent() {
    let fixture = Fixture::new("rerun");
    let mut pipeline = fixture.pipeline();
    let schemas = fixture.config.schemas.clone();

    let first = pipeline.run(RawInput::Fetch).unwrap();
    let facts = pipeline.sink().count(&schemas.warehouse, &FACT_SALES, None).unwrap();
    let customers = pipeline.sink().count(&schemas.warehouse, &DIM_CUSTOMER, None).unwrap();
    let products = pipeline.sink().count(&schemas.warehouse, &DIM_PRODUCT, None).unwrap();

    let second = pipeline.run(RawInput::Fetch).unwrap();
    assert_ne!(first.summary.run_id, second.summary.run_id);
    assert!(second.validation.passed(), "{:?}", second.validation.failures());

    let sink = pipeline.sink();
    assert_eq!(sink.count(&schemas.warehouse, &FACT_SALES, None).unwrap(), facts);
    assert_eq!(sink.count(&schemas.warehouse, &DIM_CUSTOMER, None).unwrap(), customers);
    assert_eq!(sink.count(&schemas.warehouse, &DIM_PRODUCT, None).unwrap(), products);
    assert_eq!(first.summary.dimension_sizes, second.summary.dimension_sizes);

    // Both runs stay staged in the raw store
    assert_eq!(sink.count(&schemas.raw, &RAW_SALES, None).unwrap(), 14);
    assert_eq!(sink.count(&schemas.processed, &PROCESSED_SALES, None).unwrap(), 5);
}

#[test]
fn test_replay_from_raw_store() {
    let fixture = Fixture::new("replay");
    let mut pipeline = fixture.pipeline();

    let first = pipeline.run(RawInput::Fetch).unwrap();
    let replay = pipeline
        .run(RawInput::Replay(first.summary.run_id.clone()))
        .unwrap();

    assert!(replay.summary.replayed);
    assert_eq!(replay.summary.run_id, first.summary.run_id);
    assert_eq!(replay.summary.source_file, None);
    assert_eq!(replay.summary.raw_rows, 7);
    assert_eq!(replay.summary.facts_written, first.summary.facts_written);
    assert!(replay.validation.passed(), "{:?}", replay.validation.failures());

    // Replay never stages the rows again
    let schemas = &fixture.config.schemas;
    assert_eq!(pipeline.sink().count(&schemas.raw, &RAW_SALES, None).unwrap(), 7);
}

#[test]
fn test_replay_unknown_run_fails() {
    let fixture = Fixture::new("unknown");
    let mut pipeline = fixture.pipeline();

    let err = pipeline
        .run(RawInput::Replay("no-such-run".to_string()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownRun(ref id) if id == "no-such-run"));
}

#[test]
fn test_missing_dataset_is_ingestion_error() {
    let mut fixture = Fixture::new("missing");
    fixture.config.dataset.identifier = "nobody/nothing".to_string();
    let mut pipeline = fixture.pipeline();

    let err = pipeline.run(RawInput::Fetch).unwrap_err();
    assert!(matches!(err, PipelineError::Ingestion(_)));

    // Nothing staged on failure
    let schemas = &fixture.config.schemas;
    assert_eq!(pipeline.sink().count(&schemas.raw, &RAW_SALES, None).unwrap(), 0);
}

#[test]
fn test_outputs_written_as_json() {
    let fixture = Fixture::new("outputs");
    let mut pipeline = fixture.pipeline();
    let outcome = pipeline.run(RawInput::Fetch).unwrap();

    let written = star_etl::write_outputs(&fixture.config.output_dir, &outcome).unwrap();
    assert_eq!(written.len(), 3);

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
    assert_eq!(summary["run_id"], outcome.summary.run_id.as_str());
    assert_eq!(summary["facts_written"], 5);
}
