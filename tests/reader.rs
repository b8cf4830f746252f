use csvflow::{ChunkBudget, ChunkedReader, CsvFormat, Strictness, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn open(
    path: &std::path::Path,
    budget: ChunkBudget,
    strictness: Strictness,
) -> csvflow::Result<ChunkedReader> {
    ChunkedReader::open(path, &CsvFormat::default(), budget, strictness)
}

#[test]
fn chunks_respect_the_row_budget_and_preserve_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "n\n1\n2\n3\n4\n5\n");

    let mut reader = open(&input, ChunkBudget::Rows(2), Strictness::Strict)?;
    assert_eq!(reader.schema().columns(), ["n"]);

    let chunks: Vec<_> = reader.by_ref().collect::<csvflow::Result<_>>()?;
    assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), [2, 2, 1]);
    let flat: Vec<Value> = chunks.iter().flatten().map(|r| r[0].clone()).collect();
    let expected: Vec<Value> = [1.0, 2.0, 3.0, 4.0, 5.0]
        .iter()
        .map(|&n| Value::Number(n))
        .collect();
    assert_eq!(flat, expected);
    Ok(())
}

#[test]
fn byte_budget_always_admits_at_least_one_row() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(
        &dir,
        "in.csv",
        "text\nlonger-than-any-reasonable-byte-budget\nanother-long-row\n",
    );

    let reader = open(&input, ChunkBudget::Bytes(1), Strictness::Strict)?;
    let chunks: Vec<_> = reader.collect::<csvflow::Result<_>>()?;
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.len() == 1));
    Ok(())
}

#[test]
fn strict_mode_rejects_ragged_rows_with_their_index() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "a,b\n1,2\n3\n");

    let mut reader = open(&input, ChunkBudget::Rows(10), Strictness::Strict)?;
    let err = reader.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        csvflow::Error::MalformedRow { row_index: 2, expected: 2, found: 1 }
    ));
    Ok(())
}

#[test]
fn lenient_mode_pads_short_rows_and_drops_extra_fields() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "a,b\n1\n2,3,4\n");

    let reader = open(&input, ChunkBudget::Rows(10), Strictness::Lenient)?;
    let chunks: Vec<_> = reader.collect::<csvflow::Result<_>>()?;
    let rows: Vec<_> = chunks.into_iter().flatten().collect();
    assert_eq!(rows[0], vec![Value::Number(1.0), Value::Null]);
    assert_eq!(rows[1], vec![Value::Number(2.0), Value::Number(3.0)]);
    Ok(())
}

#[test]
fn null_token_and_empty_fields_both_parse_as_null() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "a,b\nNA,\nx,1\n");

    let format = CsvFormat::default().with_null_token("NA");
    let reader =
        ChunkedReader::open(&input, &format, ChunkBudget::Rows(10), Strictness::Strict)?;
    let rows: Vec<_> = reader
        .collect::<csvflow::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(rows[0], vec![Value::Null, Value::Null]);
    assert_eq!(rows[1], vec![Value::Text("x".into()), Value::Number(1.0)]);
    Ok(())
}

#[test]
fn rows_read_counts_data_rows_not_the_header() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "a\n1\n2\n3\n");

    let mut reader = open(&input, ChunkBudget::Rows(2), Strictness::Strict)?;
    assert_eq!(reader.rows_read(), 0);
    reader.next().unwrap()?;
    assert_eq!(reader.rows_read(), 2);
    while let Some(chunk) = reader.next() {
        chunk?;
    }
    assert_eq!(reader.rows_read(), 3);
    Ok(())
}

#[test]
fn duplicate_header_columns_are_rejected_at_open() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "a,a\n1,2\n");

    let err = open(&input, ChunkBudget::Rows(10), Strictness::Strict).unwrap_err();
    assert!(matches!(err, csvflow::Error::Config(_)));
    Ok(())
}

#[test]
fn a_zero_budget_is_rejected_at_open() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "a\n1\n");

    let err = open(&input, ChunkBudget::Rows(0), Strictness::Strict).unwrap_err();
    assert!(matches!(err, csvflow::Error::Config(_)));
    Ok(())
}

#[test]
fn quoted_fields_keep_embedded_delimiters() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = write_file(&dir, "in.csv", "a,b\n\"x,y\",1\n");

    let reader = open(&input, ChunkBudget::Rows(10), Strictness::Strict)?;
    let rows: Vec<_> = reader
        .collect::<csvflow::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(rows[0][0], Value::Text("x,y".into()));
    Ok(())
}
