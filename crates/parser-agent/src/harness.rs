//! Embedded Python helper scripts
//!
//! Both scripts print exactly one `@@PARSER_HARNESS@@ {json}` line as their
//! last stdout output. They are written to a scratch directory and run with
//! the configured interpreter.

use repair_loop::feedback::diagnostics::RESULT_MARKER;

/// Validation harness.
///
/// `argv`: candidate module path, sample PDF, expected CSV, JSON array of
/// expected column names, JSON object mapping each column to its pandas
/// dtype. Columns declared `float64` must come back with a float dtype.
/// Values are then compared like `assert_frame_equal` with
/// `check_dtype=False`: numbers within rtol 1e-5 / atol 1e-8, missing
/// values equal to each other, everything else compared as trimmed text.
/// Expected CSV headers are stripped, matching the schema read on the
/// Rust side.
pub const VALIDATION_HARNESS: &str = r#"
import importlib.util
import inspect
import json
import math
import sys
import traceback

MARKER = "@@PARSER_HARNESS@@"
MAX_ROWS = 200


def emit(record):
    sys.stdout.write("\n" + MARKER + " " + json.dumps(record, default=str) + "\n")
    sys.stdout.flush()


def describe(exc):
    return "".join(traceback.format_exception_only(type(exc), exc)).strip()


def is_missing(value):
    if value is None:
        return True
    try:
        return bool(pd.isna(value))
    except (TypeError, ValueError):
        return False


def same(expected, actual):
    if is_missing(expected) or is_missing(actual):
        return is_missing(expected) and is_missing(actual)
    try:
        return math.isclose(float(expected), float(actual), rel_tol=1e-5, abs_tol=1e-8)
    except (TypeError, ValueError):
        return str(expected).strip() == str(actual).strip()


def text(value):
    return "NaN" if is_missing(value) else str(value)


def wrong_dtypes(result, dtypes):
    rows = []
    for column, dtype in dtypes.items():
        if dtype == "float64" and not pd.api.types.is_float_dtype(result[column]):
            rows.append({"row": 0, "column": column, "expected": dtype, "actual": str(result[column].dtype)})
    return rows


def compare(result, expected, columns):
    rows = []
    for i in range(min(len(result), len(expected))):
        for column in columns:
            want = expected[column].iloc[i]
            got = result[column].iloc[i]
            if not same(want, got):
                rows.append({"row": i, "column": column, "expected": text(want), "actual": text(got)})
                if len(rows) >= MAX_ROWS:
                    return rows
    return rows


def main():
    module_path, pdf_path, csv_path, columns_json, dtypes_json = sys.argv[1:6]
    columns = json.loads(columns_json)
    dtypes = json.loads(dtypes_json)

    global pd
    try:
        import pandas as pd
    except Exception as exc:
        emit({"status": "harness_error", "message": "pandas unavailable: " + describe(exc)})
        return

    try:
        spec = importlib.util.spec_from_file_location("candidate_parser", module_path)
        module = importlib.util.module_from_spec(spec)
        spec.loader.exec_module(module)
    except BaseException as exc:
        emit({"status": "import", "message": describe(exc)})
        return

    parse = getattr(module, "parse", None)
    if not callable(parse):
        emit({"status": "import", "message": "AttributeError: module has no attribute 'parse'"})
        return
    try:
        inspect.signature(parse).bind(pdf_path)
    except TypeError as exc:
        emit({"status": "import", "message": "TypeError: parse() has the wrong signature: " + str(exc)})
        return
    except ValueError:
        pass

    try:
        result = parse(pdf_path)
    except BaseException as exc:
        emit({"status": "runtime", "message": describe(exc), "traceback": traceback.format_exc()})
        return

    if not isinstance(result, pd.DataFrame):
        emit({
            "status": "runtime",
            "message": "TypeError: parse() returned %s, expected pandas.DataFrame" % type(result).__name__,
        })
        return

    observed = [str(c) for c in result.columns]
    if observed != columns:
        emit({"status": "schema", "expected": columns, "observed": observed})
        return

    mistyped = wrong_dtypes(result, dtypes)
    if mistyped:
        names = ", ".join("%s is %s" % (r["column"], r["actual"]) for r in mistyped)
        emit({"status": "values", "message": "numeric columns must be float64: " + names, "rows": mistyped})
        return

    try:
        expected = pd.read_csv(csv_path)
    except Exception as exc:
        emit({"status": "harness_error", "message": "cannot read expected output: " + describe(exc)})
        return
    expected.columns = [str(c).strip() for c in expected.columns]

    result = result.reset_index(drop=True)
    try:
        rows = compare(result, expected, columns)
    except KeyError as exc:
        emit({"status": "harness_error", "message": "expected output lacks column " + str(exc)})
        return
    if len(result) != len(expected):
        message = "row count differs: expected %d rows, got %d" % (len(expected), len(result))
    elif rows:
        message = "DataFrame values are different"
    else:
        emit({"status": "pass"})
        return
    emit({"status": "values", "message": message, "rows": rows})


if __name__ == "__main__":
    main()
"#;

/// PDF structure probe.
///
/// `argv`: PDF path. Reports page count, the first 1000 characters of the
/// first two pages, and up to two tables per page (first rows only).
pub const PDF_PROBE: &str = r#"
import json
import sys

MARKER = "@@PARSER_HARNESS@@"


def emit(record):
    sys.stdout.write("\n" + MARKER + " " + json.dumps(record, default=str) + "\n")
    sys.stdout.flush()


def main():
    pdf_path = sys.argv[1]
    try:
        import pdfplumber
    except Exception as exc:
        emit({"status": "error", "message": "pdfplumber unavailable: %s" % exc})
        return

    try:
        with pdfplumber.open(pdf_path) as pdf:
            pages = []
            for i, page in enumerate(pdf.pages[:2]):
                text = page.extract_text() or ""
                tables = page.extract_tables() or []
                pages.append({
                    "page": i + 1,
                    "width": float(page.width),
                    "height": float(page.height),
                    "text": text[:1000],
                    "tables": [
                        [[cell if cell is not None else "" for cell in row] for row in table[:6]]
                        for table in tables[:2]
                    ],
                    "table_count": len(tables),
                })
            emit({"status": "ok", "page_count": len(pdf.pages), "pages": pages})
    except Exception as exc:
        emit({"status": "error", "message": "PDF analysis failed: %s" % exc})


if __name__ == "__main__":
    main()
"#;

/// Payload of the last marker line in `stdout`, if any.
pub fn marker_payload(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(RESULT_MARKER))
        .map(str::trim)
}
