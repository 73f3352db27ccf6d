//! End-to-end tests of the expansion engine over a mock backend.
//!
//! The mock driver records every SQL string it receives, which makes the
//! Cartesian expansion, the dedup behavior and the statement-allocation
//! rules directly observable.

mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use jdbcx::{
        BackendConnection, BackendDriver, BackendStatement, ConfigOption, ConnectionMetaData,
        DriverExtension, EmptyConfigManager, Error, ExecuteOutcome, ExtensionRegistry, Listener,
        Properties, QueryContext, Result, Rows, Schema, ShimDriver, StatementAttributes,
        VecOfRows, WrappedConnection, DEFAULT_EXTENSION_NAME,
    };

    // ------------------------------------------------------------------
    // mock backend
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MockState {
        queries: Mutex<Vec<String>>,
        batches: Mutex<Vec<String>>,
        statements: AtomicUsize,
        fetch_sizes: Mutex<Vec<u64>>,
    }

    struct MockDriver {
        product: (&'static str, &'static str),
        state: Arc<MockState>,
    }

    impl MockDriver {
        fn new() -> Self {
            MockDriver {
                product: ("mockdb", "1.0"),
                state: Arc::new(MockState::default()),
            }
        }

        fn with_product(product: (&'static str, &'static str)) -> Self {
            MockDriver {
                product,
                state: Arc::new(MockState::default()),
            }
        }

        fn state(&self) -> Arc<MockState> {
            self.state.clone()
        }
    }

    impl BackendDriver for MockDriver {
        fn name(&self) -> &str {
            "mock_backend"
        }

        fn accepts_url(&self, url: &str) -> bool {
            url.starts_with("jdbc:mock:")
        }

        fn connect(&self, url: &str, _props: &Properties) -> Result<Box<dyn BackendConnection>> {
            if !self.accepts_url(url) {
                return Err(Error::backend(format!("unsupported URL: {url}"), Vec::new()));
            }
            Ok(Box::new(MockConnection {
                url: url.to_string(),
                product: self.product,
                state: self.state.clone(),
                closed: false,
            }))
        }
    }

    struct MockConnection {
        url: String,
        product: (&'static str, &'static str),
        state: Arc<MockState>,
        closed: bool,
    }

    impl BackendConnection for MockConnection {
        fn create_statement(&mut self) -> Result<Box<dyn BackendStatement>> {
            self.state.statements.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockStatement {
                state: self.state.clone(),
                attrs: StatementAttributes::default(),
            }))
        }

        fn metadata(&self) -> Result<ConnectionMetaData> {
            Ok(ConnectionMetaData {
                package_name: "mock_backend".into(),
                product_name: self.product.0.into(),
                product_version: self.product.1.into(),
                driver_name: "mock".into(),
                driver_version: "1.0".into(),
                user_name: "tester".into(),
                url: self.url.clone(),
            })
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    struct MockStatement {
        state: Arc<MockState>,
        attrs: StatementAttributes,
    }

    impl BackendStatement for MockStatement {
        fn execute(&mut self, sql: &str) -> Result<ExecuteOutcome> {
            self.state.queries.lock().unwrap().push(sql.to_string());
            if sql.trim_start().to_ascii_lowercase().starts_with("select") {
                Ok(ExecuteOutcome::RowSet(Box::new(VecOfRows::single(
                    "r", sql,
                ))))
            } else {
                Ok(ExecuteOutcome::UpdateCount(1))
            }
        }

        fn execute_query(&mut self, sql: &str) -> Result<Box<dyn Rows>> {
            self.state.queries.lock().unwrap().push(sql.to_string());
            Ok(Box::new(VecOfRows::single("r", sql)))
        }

        fn execute_update(&mut self, sql: &str) -> Result<i64> {
            self.state.queries.lock().unwrap().push(sql.to_string());
            Ok(1)
        }

        fn add_batch(&mut self, sql: &str) -> Result<()> {
            self.state.batches.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        fn attributes(&self) -> StatementAttributes {
            self.attrs
        }

        fn set_attributes(&mut self, attrs: StatementAttributes) -> Result<()> {
            self.attrs = attrs;
            self.state.fetch_sizes.lock().unwrap().push(attrs.fetch_size);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // test extensions
    // ------------------------------------------------------------------

    /// Fixed rows under a configurable name, with capability toggles.
    struct TestExtension {
        name: &'static str,
        rows: Vec<&'static str>,
        direct: bool,
        no_args: bool,
        calls: Arc<AtomicUsize>,
    }

    impl TestExtension {
        fn new(name: &'static str, rows: &[&'static str]) -> Self {
            TestExtension {
                name,
                rows: rows.to_vec(),
                direct: false,
                no_args: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn direct(mut self) -> Self {
            self.direct = true;
            self
        }
    }

    impl DriverExtension for TestExtension {
        fn name(&self) -> &str {
            self.name
        }

        fn supports_direct_query(&self) -> bool {
            self.direct
        }

        fn supports_no_arguments(&self) -> bool {
            self.no_args
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            _props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.iter().map(|r| r.to_string()).collect();
            Ok(Box::new(StaticListener { rows }))
        }
    }

    struct StaticListener {
        rows: Vec<String>,
    }

    impl Listener for StaticListener {
        fn on_query(&mut self, _query: &str) -> Result<Box<dyn Rows>> {
            Ok(Box::new(VecOfRows::from_strings(
                "results",
                self.rows.clone(),
            )))
        }
    }

    /// Interprets each `echo X` line of the body as one row `X`.
    struct EchoLinesExtension;

    impl DriverExtension for EchoLinesExtension {
        fn name(&self) -> &str {
            "shell"
        }

        fn aliases(&self) -> Vec<String> {
            vec!["sh".to_string()]
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            _props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            Ok(Box::new(EchoLinesListener))
        }
    }

    struct EchoLinesListener;

    impl Listener for EchoLinesListener {
        fn on_query(&mut self, query: &str) -> Result<Box<dyn Rows>> {
            let rows = query
                .lines()
                .map(|l| l.trim().strip_prefix("echo ").unwrap_or(l).to_string())
                .collect();
            Ok(Box::new(VecOfRows::from_strings("results", rows)))
        }
    }

    /// Always raises a warning.
    struct WarnExtension;

    impl DriverExtension for WarnExtension {
        fn name(&self) -> &str {
            "warn"
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            _props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            Ok(Box::new(WarnListener))
        }
    }

    struct WarnListener;

    impl Listener for WarnListener {
        fn on_query(&mut self, _query: &str) -> Result<Box<dyn Rows>> {
            Err(Error::warning("evaluation degraded"))
        }
    }

    /// Records invocations; used as a procedure block.
    struct SideEffectExtension {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl DriverExtension for SideEffectExtension {
        fn name(&self) -> &str {
            "record"
        }

        fn supports_no_arguments(&self) -> bool {
            true
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            _props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            Ok(Box::new(SideEffectListener {
                log: self.log.clone(),
            }))
        }
    }

    struct SideEffectListener {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Listener for SideEffectListener {
        fn on_query(&mut self, query: &str) -> Result<Box<dyn Rows>> {
            self.log.lock().unwrap().push(query.to_string());
            Ok(Box::new(VecOfRows::empty(Schema::of(&["results"]))))
        }
    }

    /// Requires arguments and declares options, to exercise the synthetic
    /// describe table.
    struct NeedsArgsExtension;

    const NEEDS_ARGS_OPTIONS: &[ConfigOption] = &[ConfigOption::new(
        "needsargs.timeout",
        "10",
        "seconds before the evaluation is abandoned",
        &[],
    )];

    impl DriverExtension for NeedsArgsExtension {
        fn name(&self) -> &str {
            "needsargs"
        }

        fn default_options(&self) -> &[ConfigOption] {
            NEEDS_ARGS_OPTIONS
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            _props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            Ok(Box::new(StaticListener { rows: Vec::new() }))
        }
    }

    /// Stands in for the bridge extension: echoes the rewritten content and
    /// captures the context properties it was created with.
    struct BridgeProbeExtension {
        captured: Arc<Mutex<Vec<Properties>>>,
    }

    impl DriverExtension for BridgeProbeExtension {
        fn name(&self) -> &str {
            "bridge"
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            self.captured.lock().unwrap().push(props.clone());
            Ok(Box::new(BridgeProbeListener))
        }
    }

    struct BridgeProbeListener;

    impl Listener for BridgeProbeListener {
        fn on_query(&mut self, query: &str) -> Result<Box<dyn Rows>> {
            Ok(Box::new(VecOfRows::single("results", format!("[{query}]"))))
        }
    }

    // ------------------------------------------------------------------
    // harness
    // ------------------------------------------------------------------

    const URL: &str = "jdbcx::mock://db";

    fn extensions(side_log: &Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn DriverExtension>> {
        vec![
            Arc::new(EchoLinesExtension),
            Arc::new(TestExtension::new("x", &["1", "2"])),
            Arc::new(TestExtension::new("a", &["a1", "a2"])),
            Arc::new(TestExtension::new("b", &["b1", "b2", "b3"])),
            Arc::new(TestExtension::new("none", &[])),
            Arc::new(TestExtension::new("direct", &["r1", "r2"]).direct()),
            Arc::new(WarnExtension),
            Arc::new(NeedsArgsExtension),
            Arc::new(SideEffectExtension {
                log: side_log.clone(),
            }),
        ]
    }

    fn open(driver: MockDriver) -> (WrappedConnection, Arc<MockState>) {
        open_with_props(driver, Properties::new())
    }

    fn open_with_props(driver: MockDriver, props: Properties) -> (WrappedConnection, Arc<MockState>) {
        let state = driver.state();
        let side_log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ExtensionRegistry::new(extensions(&side_log), Vec::new()));
        let conn = WrappedConnection::open(
            Arc::new(driver),
            registry,
            Arc::new(EmptyConfigManager),
            URL,
            &props,
        )
        .unwrap();
        (conn, state)
    }

    fn all_rows(rows: &mut dyn Rows) -> Vec<String> {
        jdbcx::rows::drain(rows)
            .unwrap()
            .iter()
            .map(|r| r.value(0).as_string().to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // expansion behavior
    // ------------------------------------------------------------------

    #[test]
    fn plain_query_passes_through() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        let mut rows = stmt.execute_query("select 1").unwrap();
        assert_eq!(all_rows(rows.as_mut()), vec!["select 1"]);
        assert_eq!(*state.queries.lock().unwrap(), vec!["select 1"]);
    }

    #[test]
    fn single_row_block_expands_in_place() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select {{ shell: echo a }}").unwrap();
        assert_eq!(*state.queries.lock().unwrap(), vec!["select a"]);
    }

    #[test]
    fn multi_row_block_multiplies_queries() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select {{ shell: echo a\necho b }}")
            .unwrap();
        assert_eq!(
            *state.queries.lock().unwrap(),
            vec!["select a", "select b"]
        );
    }

    #[test]
    fn equivalent_blocks_dedup() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_update("({{ x }},{{ x }})").unwrap();
        assert_eq!(*state.queries.lock().unwrap(), vec!["(1,1)", "(2,2)"]);
    }

    #[test]
    fn dedup_evaluates_the_extension_once() {
        let side_log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::new(TestExtension::new("x", &["1", "2"]));
        let calls = shared.calls.clone();
        let mut exts = extensions(&side_log);
        exts.retain(|e| e.name() != "x");
        exts.push(shared);
        let registry = Arc::new(ExtensionRegistry::new(exts, Vec::new()));
        let conn = WrappedConnection::open(
            Arc::new(MockDriver::new()),
            registry,
            Arc::new(EmptyConfigManager),
            URL,
            &Properties::new(),
        )
        .unwrap();
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_update("({{ x }},{{ x }})").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn skip_marker_drops_the_block() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("{{- drop this }}select 1").unwrap();
        assert_eq!(*state.queries.lock().unwrap(), vec!["select 1"]);
    }

    #[test]
    fn cartesian_expansion_is_stable() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_update("{{ a }}-{{ b }}").unwrap();
        assert_eq!(
            *state.queries.lock().unwrap(),
            vec!["a1-b1", "a1-b2", "a1-b3", "a2-b1", "a2-b2", "a2-b3"]
        );
        assert_eq!(stmt.update_count(), 6);
    }

    #[test]
    fn zero_rows_expand_to_zero_queries() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        assert!(!stmt.execute("select {{ none }}").unwrap());
        assert_eq!(stmt.update_count(), 0);
        assert!(state.queries.lock().unwrap().is_empty());

        let mut rows = stmt.execute_query("select {{ none }}").unwrap();
        assert!(all_rows(rows.as_mut()).is_empty());
    }

    #[test]
    fn no_output_block_expands_to_nothing() {
        let side_log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ExtensionRegistry::new(extensions(&side_log), Vec::new()));
        let driver = MockDriver::new();
        let state = driver.state();
        let conn = WrappedConnection::open(
            Arc::new(driver),
            registry,
            Arc::new(EmptyConfigManager),
            URL,
            &Properties::new(),
        )
        .unwrap();
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("{% record: setup %}select 1").unwrap();
        assert_eq!(*state.queries.lock().unwrap(), vec!["select 1"]);
        assert_eq!(*side_log.lock().unwrap(), vec!["setup"]);
    }

    #[test]
    fn pre_query_evaluates_before_the_owner() {
        let side_log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ExtensionRegistry::new(extensions(&side_log), Vec::new()));
        let driver = MockDriver::new();
        let state = driver.state();
        let conn = WrappedConnection::open(
            Arc::new(driver),
            registry,
            Arc::new(EmptyConfigManager),
            URL,
            &Properties::new(),
        )
        .unwrap();
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query(
            "select {{ shell(preQuery='record: before', postQuery='record: after'): echo a }}",
        )
        .unwrap();
        assert_eq!(*side_log.lock().unwrap(), vec!["before", "after"]);
        assert_eq!(*state.queries.lock().unwrap(), vec!["select a"]);
    }

    #[test]
    fn warning_substitutes_the_raw_content() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select {{ warn: fallback body }}").unwrap();
        assert_eq!(
            *state.queries.lock().unwrap(),
            vec!["select fallback body"]
        );
        assert_eq!(stmt.warnings().len(), 1);
        assert!(stmt.warnings()[0].is_warning());
    }

    #[test]
    fn unknown_extension_is_a_resolution_error() {
        let (conn, _state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        let err = stmt.execute_query("select {{ nosuch: x }}").unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }), "{err}");
    }

    // ------------------------------------------------------------------
    // direct queries
    // ------------------------------------------------------------------

    #[test]
    fn direct_query_short_circuits() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        assert!(stmt.execute("{{ direct: anything }}").unwrap());
        assert_eq!(stmt.update_count(), -1);
        let mut rows = stmt.take_rows().unwrap();
        assert_eq!(all_rows(rows.as_mut()), vec!["r1", "r2"]);
        assert!(state.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn dryrun_returns_block_rows_without_sql() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        assert!(stmt.execute("{{ x(exec.dryrun=true) }}").unwrap());
        let mut rows = stmt.take_rows().unwrap();
        assert_eq!(all_rows(rows.as_mut()), vec!["1", "2"]);
        assert!(state.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_argument_block_describes_the_extension() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        assert!(stmt.execute("{{ needsargs }}").unwrap());
        let mut rows = stmt.take_rows().unwrap();
        assert_eq!(rows.schema().num_columns(), 2);
        let table = jdbcx::rows::drain(rows.as_mut()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].value(0).as_string(), "needsargs.timeout");
        assert_eq!(table[0].value(1).as_string(), "10");
        assert!(state.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn execute_update_never_exposes_a_direct_result() {
        let (conn, _state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        assert_eq!(stmt.execute_update("{{ direct: anything }}").unwrap(), 0);
        assert!(stmt.take_rows().is_none());
    }

    // ------------------------------------------------------------------
    // statement layer
    // ------------------------------------------------------------------

    #[test]
    fn update_counts_sum_across_expanded_queries() {
        let (conn, _state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        assert!(!stmt.execute("update t set v = {{ x }}").unwrap());
        assert_eq!(stmt.update_count(), 2);
    }

    #[test]
    fn execute_reports_result_sets_with_minus_one() {
        let (conn, _state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        assert!(stmt.execute("select {{ x }}").unwrap());
        assert_eq!(stmt.update_count(), -1);
        let mut rows = stmt.take_rows().unwrap();
        assert_eq!(all_rows(rows.as_mut()), vec!["select 1", "select 2"]);
    }

    #[test]
    fn single_result_set_dialect_gets_fresh_statements() {
        let driver = MockDriver::with_product(("SQLite", "3.45"));
        let (conn, state) = open(driver);
        let mut stmt = conn.create_wrapped_statement().unwrap();
        let attrs = StatementAttributes {
            fetch_size: 7,
            ..StatementAttributes::default()
        };
        BackendStatement::set_attributes(&mut stmt, attrs).unwrap();
        stmt.execute_update("update t set v = {{ x }}").unwrap();
        // one statement backs the wrapper, one more per expanded query
        assert_eq!(state.statements.load(Ordering::SeqCst), 3);
        assert!(state.fetch_sizes.lock().unwrap().contains(&7));
    }

    #[test]
    fn multi_result_set_dialect_reuses_the_statement() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_update("update t set v = {{ x }}").unwrap();
        assert_eq!(state.statements.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_batch_collapses_to_one_string_with_a_warning() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.add_batch("select {{ x }}").unwrap();
        assert_eq!(*state.batches.lock().unwrap(), vec!["select 1"]);
        assert_eq!(stmt.warnings().len(), 1);
    }

    #[test]
    fn add_batch_without_blocks_is_verbatim() {
        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.add_batch("insert into t values (1)").unwrap();
        assert_eq!(
            *state.batches.lock().unwrap(),
            vec!["insert into t values (1)"]
        );
        assert!(stmt.warnings().is_empty());
    }

    // ------------------------------------------------------------------
    // connection lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn manager_closes_children_then_primary() {
        let (conn, _state) = open(MockDriver::new());
        let child = conn.manager().create_connection().unwrap();
        assert!(!child.lock().is_closed());
        conn.manager().close().unwrap();
        assert!(child.lock().is_closed());
        assert!(conn.manager().is_closed());
        // idempotent
        conn.manager().close().unwrap();
    }

    #[test]
    fn shim_driver_routes_urls() {
        let driver = MockDriver::new();
        let state = driver.state();
        let shim = ShimDriver::new(
            Arc::new(driver),
            vec![Arc::new(EchoLinesExtension)],
            Arc::new(EmptyConfigManager),
        );
        assert!(shim.accepts_url("jdbcx::mock://db"));
        assert!(shim.accepts_url("jdbc:mock:plain"));

        let mut wrapped = shim.connect("jdbcx::mock://db", &Properties::new()).unwrap();
        let mut stmt = wrapped.create_statement().unwrap();
        stmt.execute_query("select {{ sh: echo ok }}").unwrap();
        assert_eq!(*state.queries.lock().unwrap(), vec!["select ok"]);

        // a plain URL bypasses the shim entirely
        let plain = shim.connect("jdbc:mock:plain", &Properties::new()).unwrap();
        assert!(!plain.is_closed());
    }

    #[test]
    fn whitelist_applies_through_connection_properties() {
        let shim = ShimDriver::new(
            Arc::new(MockDriver::new()),
            vec![
                Arc::new(EchoLinesExtension),
                Arc::new(TestExtension::new("x", &["1"])),
            ],
            Arc::new(EmptyConfigManager),
        );
        let props = Properties::from_pairs([("jdbcx.extension.whitelist", "x")]);
        let mut wrapped = shim.connect("jdbcx::mock://db", &props).unwrap();
        let mut stmt = wrapped.create_statement().unwrap();
        let err = stmt.execute_query("select {{ shell: echo a }}").unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }), "{err}");
    }

    #[test]
    fn whitelist_applies_from_config_file_defaults() {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "jdbcx.extension.whitelist=x").unwrap();
        file.flush().unwrap();
        let shim = ShimDriver::new(
            Arc::new(MockDriver::new()),
            vec![
                Arc::new(EchoLinesExtension),
                Arc::new(TestExtension::new("x", &["1"])),
            ],
            Arc::new(EmptyConfigManager),
        );
        // the whitelist reaches the registry through the defaults file, not
        // the per-call properties
        let props = Properties::from_pairs([(
            "jdbcx.config.path",
            file.path().to_str().unwrap(),
        )]);
        let mut wrapped = shim.connect("jdbcx::mock://db", &props).unwrap();
        let mut stmt = wrapped.create_statement().unwrap();
        let err = stmt.execute_query("select {{ shell: echo a }}").unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }), "{err}");
        // the whitelisted extension still resolves
        stmt.execute_query("select {{ x }}").unwrap();
    }

    #[test]
    fn config_file_defaults_select_the_square_tag() {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "jdbcx.tag=square").unwrap();
        file.flush().unwrap();
        let props = Properties::from_pairs([(
            "jdbcx.config.path",
            file.path().to_str().unwrap(),
        )]);
        let (conn, state) = open_with_props(MockDriver::new(), props);
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select [[ shell: echo a ]]").unwrap();
        assert_eq!(*state.queries.lock().unwrap(), vec!["select a"]);
    }

    #[test]
    fn url_extension_becomes_the_default() {
        let driver = MockDriver::new();
        let state = driver.state();
        let side_log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ExtensionRegistry::new(extensions(&side_log), Vec::new()));
        let conn = WrappedConnection::open(
            Arc::new(driver),
            registry,
            Arc::new(EmptyConfigManager),
            "jdbcx:shell:mock://db",
            &Properties::new(),
        )
        .unwrap();
        assert_eq!(conn.manager().backend_url(), "jdbc:mock://db");
        let mut stmt = conn.create_wrapped_statement().unwrap();
        // the empty-extension block resolves to the URL's extension
        stmt.execute_query("select {{ : echo a }}").unwrap();
        assert_eq!(*state.queries.lock().unwrap(), vec!["select a"]);
    }

    #[test]
    fn split_sections_run_independently() {
        let text = indoc::indoc! {"
            --;; first
            select 1
            --;; second
            select {{ x }}
        "};
        let sections = jdbcx::split(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], ("first".to_string(), "select 1".to_string()));

        let (conn, state) = open(MockDriver::new());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        for (_label, body) in &sections {
            stmt.execute_query(body).unwrap();
        }
        assert_eq!(
            *state.queries.lock().unwrap(),
            vec!["select 1", "select 1", "select 2"]
        );
    }

    #[test]
    fn metadata_facade_lists_extensions_as_catalogs() {
        let (conn, _state) = open(MockDriver::new());
        let facade = conn.metadata_facade();
        let mut catalogs = facade.get_catalogs();
        let names = all_rows(&mut catalogs);
        assert!(names.contains(&"shell".to_string()));
        assert!(names.contains(&DEFAULT_EXTENSION_NAME.to_string()));
    }

    /// Exposes schemas and tables through the metadata facade.
    struct CatalogExtension;

    impl DriverExtension for CatalogExtension {
        fn name(&self) -> &str {
            "files"
        }

        fn db_schemas(&self, _config: &dyn jdbcx::ConfigManager) -> Vec<String> {
            vec!["local".to_string()]
        }

        fn db_tables(
            &self,
            _config: &dyn jdbcx::ConfigManager,
            _schema: Option<&str>,
        ) -> Vec<String> {
            vec!["readme".to_string(), "notes".to_string()]
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            _props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            Ok(Box::new(StaticListener { rows: Vec::new() }))
        }
    }

    #[test]
    fn metadata_facade_consults_matched_extensions() {
        let registry = Arc::new(ExtensionRegistry::new(
            vec![Arc::new(CatalogExtension)],
            Vec::new(),
        ));
        let conn = WrappedConnection::open(
            Arc::new(MockDriver::new()),
            registry,
            Arc::new(EmptyConfigManager),
            URL,
            &Properties::new(),
        )
        .unwrap();
        let facade = conn.metadata_facade();

        let mut schemas = facade.get_schemas(Some("files"));
        assert_eq!(all_rows(&mut schemas), vec!["local"]);
        let mut none = facade.get_schemas(Some("other"));
        assert!(all_rows(&mut none).is_empty());

        let mut tables = facade.get_tables(Some("files"), Some("local"));
        let mut drained = jdbcx::rows::drain(&mut tables).unwrap();
        assert_eq!(drained.len(), 2);
        let first = drained.remove(0);
        assert_eq!(first.value(0).as_string(), "files");
        assert_eq!(first.value(1).as_string(), "local");
        assert_eq!(first.value(2).as_string(), "readme");
        assert_eq!(first.value(3).as_string(), "TABLE");

        let mut types = facade.get_table_types();
        assert_eq!(all_rows(&mut types), vec!["TABLE"]);
    }

    // ------------------------------------------------------------------
    // bridge bypass
    // ------------------------------------------------------------------

    fn open_with_bridge(
        server_url: &str,
    ) -> (WrappedConnection, Arc<MockState>, Arc<Mutex<Vec<Properties>>>) {
        let driver = MockDriver::new();
        let state = driver.state();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let side_log = Arc::new(Mutex::new(Vec::new()));
        let mut exts = extensions(&side_log);
        exts.push(Arc::new(BridgeProbeExtension {
            captured: captured.clone(),
        }));
        let registry = Arc::new(ExtensionRegistry::new(exts, Vec::new()));
        let props = Properties::from_pairs([("jdbcx.server.url", server_url)]);
        let conn = WrappedConnection::open(
            Arc::new(driver),
            registry,
            Arc::new(EmptyConfigManager),
            URL,
            &props,
        )
        .unwrap();
        (conn, state, captured)
    }

    #[test]
    fn table_keyword_routes_to_the_bridge() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/config")
            .with_status(200)
            .with_body("bridge.version=2.0\n")
            .create();
        let (conn, state, captured) = open_with_bridge(&server.url());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select * from {{ table: select remote }}")
            .unwrap();
        assert_eq!(
            *state.queries.lock().unwrap(),
            vec!["select * from [{{ table: select remote }}]"]
        );
        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let props = &captured[0];
        assert_eq!(props.get("bridge.path").as_deref(), Some("async/"));
        assert_eq!(props.get("bridge.url").as_deref(), Some(server.url().as_str()));
        assert_eq!(props.get("bridge.version").as_deref(), Some("2.0"));
        assert_eq!(props.get("product").as_deref(), Some("mockdb/1.0"));
        assert_eq!(props.get("user").as_deref(), Some("tester"));
    }

    #[test]
    fn values_keyword_gets_a_direct_path_with_a_unique_id() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/config")
            .with_status(200)
            .with_body("")
            .create();
        let (conn, _state, captured) = open_with_bridge(&server.url());
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select * from {{ values: 1,2 }}").unwrap();
        let captured = captured.lock().unwrap();
        let path = captured[0].get("bridge.path").unwrap();
        assert!(path.starts_with("direct/"), "{path}");
        assert!(path.len() > "direct/".len());
    }

    #[test]
    fn bridge_fetch_failure_leaves_only_the_url() {
        // nothing listens on this port; the context degrades gracefully
        let (conn, _state, captured) = open_with_bridge("http://127.0.0.1:9");
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select * from {{ table: q }}").unwrap();
        let captured = captured.lock().unwrap();
        let props = &captured[0];
        assert_eq!(
            props.get("bridge.url").as_deref(),
            Some("http://127.0.0.1:9")
        );
        assert!(props.get("product").is_none());
    }

    #[test]
    fn bridge_token_is_encoded_when_auth_is_on() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/config")
            .with_status(200)
            .with_body("")
            .create();
        let driver = MockDriver::new();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ExtensionRegistry::new(
            vec![Arc::new(BridgeProbeExtension {
                captured: captured.clone(),
            })],
            Vec::new(),
        ));
        let props = Properties::from_pairs([
            ("jdbcx.server.url", server.url().as_str()),
            ("jdbcx.server.auth", "true"),
            ("jdbcx.server.token", "secret"),
        ]);
        let conn = WrappedConnection::open(
            Arc::new(driver),
            registry,
            Arc::new(EmptyConfigManager),
            URL,
            &props,
        )
        .unwrap();
        let mut stmt = conn.create_wrapped_statement().unwrap();
        stmt.execute_query("select {{ table: q }}").unwrap();
        let captured = captured.lock().unwrap();
        assert_eq!(
            captured[0].get("bridge.token").as_deref(),
            Some("c2VjcmV0")
        );
    }
}
