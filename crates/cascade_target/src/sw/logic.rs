//! The software logic core: a direct interpreter over one module's AST.
//!
//! Construction flattens the module's elaborated items into storage and a
//! process list: continuous assignments and `always @*` bodies become
//! combinational processes with computed sensitivity, edge-guarded `always`
//! bodies become edge processes, and `initial` bodies run exactly once (the
//! ran-initials flag travels with engine state, so replacement and
//! save/restart never re-run them). Evaluation drives an activation set to
//! a fixpoint; nonblocking assignments are captured with their resolved
//! targets and committed in the update phase.

use cascade_analyze::module_info::assign_kind;
use cascade_analyze::resolve::is_use_position;
use cascade_analyze::{walk_module, Evaluate, Resolve, VarRead};
use cascade_ast::{Ast, Edge, Node, NodeId};
use cascade_common::bits::Kind;
use cascade_common::Bits;
use cascade_runtime::{CompileRequest, Core, Interface, SId, VarMap, VId};
use std::collections::HashMap;
use std::sync::Arc;

/// Safety bound on interpreted loop iterations.
const LOOP_LIMIT: u64 = 1 << 20;

/// One storage slot: a scalar or an unpacked array of values.
struct Var {
    width: u32,
    signed: bool,
    dims: Vec<(i64, i64)>,
    vals: Vec<Bits>,
}

impl Var {
    fn element_count(dims: &[(i64, i64)]) -> usize {
        dims.iter()
            .map(|&(m, l)| (m - l + 1).max(1) as usize)
            .product::<usize>()
            .max(1)
    }

    /// Flattens array indices row-major; `None` when out of range.
    fn flat(&self, indices: &[i64]) -> Option<usize> {
        if self.dims.is_empty() {
            return Some(0);
        }
        if indices.len() < self.dims.len() {
            return None;
        }
        let mut idx = 0usize;
        for (i, &(m, l)) in self.dims.iter().enumerate() {
            let span = (m - l + 1) as usize;
            let off = indices[i] - l;
            if off < 0 || off as usize >= span {
                return None;
            }
            idx = idx * span + off as usize;
        }
        Some(idx)
    }
}

enum ProcKind {
    Initial,
    Comb,
    Edge(Vec<(NodeId, Edge)>),
}

struct Process {
    kind: ProcKind,
    body: NodeId,
}

/// One resolved assignment target.
enum TargetPart {
    Whole(NodeId, Vec<i64>),
    Select(NodeId, Vec<i64>, i64, i64),
}

struct VarReader<'a> {
    vars: &'a HashMap<NodeId, Var>,
    iface: &'a Arc<dyn Interface>,
}

impl VarRead for VarReader<'_> {
    fn read_var(&self, decl: NodeId, indices: &[i64]) -> Option<Bits> {
        let var = self.vars.get(&decl)?;
        let val = match var.flat(indices) {
            Some(i) => var.vals[i].clone(),
            None => Bits::zero(var.width),
        };
        let kind = if var.signed { Kind::Signed } else { Kind::Unsigned };
        Some(val.with_kind(kind))
    }

    fn feof(&self, fd: &Bits) -> Option<bool> {
        Some(self.iface.sgetc(SId(fd.to_u64() as u32)) < 0)
    }
}

/// The interpreting logic core.
pub struct SwLogic {
    ast: Ast,
    iface: Arc<dyn Interface>,
    vars: HashMap<NodeId, Var>,
    input_vids: HashMap<VId, NodeId>,
    output_vids: HashMap<NodeId, VId>,
    state_vids: Vec<(NodeId, VId)>,
    init_vid: VId,
    procs: Vec<Process>,
    sensitivity: HashMap<NodeId, Vec<usize>>,
    edge_watch: HashMap<NodeId, Vec<(usize, Edge)>>,
    active: Vec<bool>,
    updates: Vec<(Vec<(TargetPart, u32)>, Bits)>,
    ran_initial: bool,
    tasks: bool,
}

impl SwLogic {
    /// Builds an interpreter from a compile request.
    pub fn new(req: CompileRequest, iface: Arc<dyn Interface>) -> Self {
        let CompileRequest {
            ast,
            md,
            inputs,
            outputs,
            state,
            init_vid,
            ..
        } = req;
        let mut this = Self {
            ast,
            iface,
            vars: HashMap::new(),
            input_vids: HashMap::new(),
            output_vids: HashMap::new(),
            state_vids: Vec::new(),
            init_vid,
            procs: Vec::new(),
            sensitivity: HashMap::new(),
            edge_watch: HashMap::new(),
            active: Vec::new(),
            updates: Vec::new(),
            ran_initial: false,
            tasks: false,
        };
        for spec in inputs {
            this.input_vids.insert(spec.vid, spec.decl);
        }
        for spec in outputs {
            this.output_vids.insert(spec.decl, spec.vid);
        }
        this.state_vids = state.iter().map(|s| (s.decl, s.vid)).collect();
        this.build(md);
        this
    }

    fn build(&mut self, md: NodeId) {
        let mut decls = Vec::new();
        let mut always = Vec::new();
        let mut initials = Vec::new();
        let mut assigns = Vec::new();
        walk_module(&self.ast, md, &mut |ast, node| match ast.node(node) {
            n if n.is_decl() => {
                // Port wrappers stand in for their inner declaration.
                let wrapped = ast
                    .parent(node)
                    .is_some_and(|p| matches!(ast.node(p), Node::PortDecl { .. }));
                if !wrapped {
                    decls.push(node);
                }
            }
            Node::Always { stmt } => always.push(*stmt),
            Node::Initial { stmt } => initials.push(*stmt),
            Node::ContAssign { .. } => assigns.push(node),
            _ => {}
        });

        // Storage.
        for decl in &decls {
            let decl = *decl;
            let width = Evaluate::new(&mut self.ast).decl_width(decl).unwrap_or(1);
            let signed = cascade_analyze::eval::decl_signed(&self.ast, decl);
            let dims = Evaluate::new(&mut self.ast)
                .decl_array_dims(decl)
                .unwrap_or_default();
            let count = Var::element_count(&dims);
            self.vars.insert(
                decl,
                Var {
                    width,
                    signed,
                    dims,
                    vals: vec![Bits::zero(width); count],
                },
            );
        }

        // Initial values; net initializers act as continuous assignments.
        for decl in &decls {
            let decl = *decl;
            match self.ast.node(decl).clone() {
                Node::NetDecl {
                    init: Some(_), ..
                } => self.procs.push(Process {
                    kind: ProcKind::Comb,
                    body: decl,
                }),
                Node::RegDecl {
                    init: Some(init), ..
                }
                | Node::IntegerDecl { init: Some(init), .. } => {
                    if let Node::Fopen { path } = self.ast.node(init).clone() {
                        let sid = match self.ast.node(path).clone() {
                            Node::StringLit { val } => self.iface.fopen(&val),
                            _ => SId(0),
                        };
                        if let Some(var) = self.vars.get_mut(&decl) {
                            var.vals[0] = Bits::new(32, sid.0 as u64).resize(var.width);
                        }
                    } else if let Some(v) = self.eval(init) {
                        if let Some(var) = self.vars.get_mut(&decl) {
                            let w = var.width;
                            var.vals[0] = v.resize(w);
                        }
                    }
                }
                Node::PortDecl { decl: inner, .. } => {
                    // `output reg val = e;` — initializer on the inner half.
                    if let Node::RegDecl {
                        init: Some(init), ..
                    } = self.ast.node(inner).clone()
                    {
                        if let Some(v) = self.eval(init) {
                            if let Some(var) = self.vars.get_mut(&decl) {
                                let w = var.width;
                                var.vals[0] = v.resize(w);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // Processes.
        for assign in assigns {
            self.procs.push(Process {
                kind: ProcKind::Comb,
                body: assign,
            });
        }
        for stmt in always {
            let (kind, body) = self.classify_always(stmt);
            self.procs.push(Process { kind, body });
        }
        for stmt in initials {
            self.procs.push(Process {
                kind: ProcKind::Initial,
                body: stmt,
            });
        }

        // Sensitivity and edge maps.
        for i in 0..self.procs.len() {
            let body = self.procs[i].body;
            let is_comb = matches!(self.procs[i].kind, ProcKind::Comb);
            let edges = match &self.procs[i].kind {
                ProcKind::Edge(edges) => edges.clone(),
                _ => Vec::new(),
            };
            if is_comb {
                for decl in self.collect_reads(body) {
                    self.sensitivity.entry(decl).or_default().push(i);
                }
            }
            for (decl, edge) in edges {
                self.edge_watch.entry(decl).or_default().push((i, edge));
            }
        }

        // Everything combinational computes once up front.
        self.active = self
            .procs
            .iter()
            .map(|p| matches!(p.kind, ProcKind::Comb))
            .collect();
    }

    /// Splits an `always` body into its trigger specification and body.
    fn classify_always(&mut self, stmt: NodeId) -> (ProcKind, NodeId) {
        if let Node::Timing { ctrl, stmt: body } = self.ast.node(stmt).clone() {
            if let Node::EventControl { events } = self.ast.node(ctrl).clone() {
                let mut edges = Vec::new();
                let mut any_level = events.is_empty();
                for e in events {
                    let Node::Event { edge, expr } = self.ast.node(e).clone() else {
                        continue;
                    };
                    match edge {
                        Edge::Pos | Edge::Neg => {
                            if let Some(decl) = Resolve::new(&mut self.ast).get_resolution(expr) {
                                edges.push((decl, edge));
                            }
                        }
                        Edge::Any => any_level = true,
                    }
                }
                if !edges.is_empty() && !any_level {
                    return (ProcKind::Edge(edges), body);
                }
                return (ProcKind::Comb, body);
            }
            // Delay-guarded bodies: the delay is not honored.
            return (ProcKind::Comb, body);
        }
        (ProcKind::Comb, stmt)
    }

    /// The declarations read (not written) by a process body.
    fn collect_reads(&mut self, body: NodeId) -> Vec<NodeId> {
        let mut idents = Vec::new();
        walk_module(&self.ast, body, &mut |ast, node| {
            if matches!(ast.node(node), Node::Identifier { .. })
                && is_use_position(ast, node)
                && assign_kind(ast, node).is_none()
            {
                idents.push(node);
            }
        });
        let mut out = Vec::new();
        for id in idents {
            if let Some(decl) = Resolve::new(&mut self.ast).get_resolution(id) {
                if !out.contains(&decl) {
                    out.push(decl);
                }
            }
        }
        out
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    fn eval(&mut self, expr: NodeId) -> Option<Bits> {
        let reader = VarReader {
            vars: &self.vars,
            iface: &self.iface,
        };
        match Evaluate::with_vars(&mut self.ast, &reader).eval(expr) {
            Ok(v) => Some(v),
            Err(e) => {
                self.iface.error(&format!("evaluation error: {e}"));
                self.tasks = true;
                None
            }
        }
    }

    fn run_fixpoint(&mut self) {
        loop {
            let Some(next) = self.active.iter().position(|&a| a) else {
                break;
            };
            self.active[next] = false;
            let body = self.procs[next].body;
            self.exec(body);
        }
    }

    /// Reacts to a variable's value change: wakes sensitive combinational
    /// processes and edge processes whose condition fired.
    fn on_var_changed(&mut self, decl: NodeId, was: bool, now: bool) {
        if let Some(procs) = self.sensitivity.get(&decl) {
            for &p in procs.clone().iter() {
                self.active[p] = true;
            }
        }
        if was != now {
            if let Some(watchers) = self.edge_watch.get(&decl) {
                for &(p, edge) in watchers.clone().iter() {
                    let fired = match edge {
                        Edge::Pos => !was && now,
                        Edge::Neg => was && !now,
                        Edge::Any => true,
                    };
                    if fired {
                        self.active[p] = true;
                    }
                }
            }
        }
    }

    /// Writes one element (or a bit range of it), firing activations and
    /// output writes on change.
    fn store(&mut self, part: &TargetPart, value: Bits) {
        let (decl, indices, sel) = match part {
            TargetPart::Whole(d, i) => (*d, i.clone(), None),
            TargetPart::Select(d, i, m, l) => (*d, i.clone(), Some((*m, *l))),
        };
        let Some(var) = self.vars.get_mut(&decl) else {
            return;
        };
        let Some(idx) = var.flat(&indices) else {
            return;
        };
        let old = var.vals[idx].clone();
        let mut new = old.clone();
        match sel {
            Some((m, l)) => {
                if m >= l && l >= 0 && (m as u64) < var.width as u64 {
                    new.assign_range(m as u32, l as u32, &value);
                }
            }
            None => {
                new = value.resize(var.width);
            }
        }
        if new != old {
            let was = old.get(0);
            let now = new.get(0);
            var.vals[idx] = new;
            self.on_var_changed(decl, was, now);
            if let Some(&vid) = self.output_vids.get(&decl) {
                let out = self.pack_var(decl);
                self.iface.write_bits(vid, &out);
            }
        }
    }

    /// Resolves an assignment target into its parts, widths included so
    /// concatenated targets can split the value.
    fn lvalue_parts(&mut self, lhs: NodeId) -> Vec<(TargetPart, u32)> {
        match self.ast.node(lhs).clone() {
            Node::Concat { parts } => {
                let mut out = Vec::new();
                for p in parts {
                    out.extend(self.lvalue_parts(p));
                }
                out
            }
            Node::Identifier { dims, .. } => {
                let Some(decl) = Resolve::new(&mut self.ast).get_resolution(lhs) else {
                    return Vec::new();
                };
                let arity = self.vars.get(&decl).map(|v| v.dims.len()).unwrap_or(0);
                let width = self.vars.get(&decl).map(|v| v.width).unwrap_or(1);
                let mut indices = Vec::new();
                for &dim in dims.iter().take(arity) {
                    match self.eval(dim) {
                        Some(v) => indices.push(v.to_i64()),
                        None => return Vec::new(),
                    }
                }
                let offset = Evaluate::new(&mut self.ast)
                    .decl_range_lsb(decl)
                    .unwrap_or(0);
                match dims.get(arity) {
                    None => vec![(TargetPart::Whole(decl, indices), width)],
                    Some(&sel) => match self.ast.node(sel).clone() {
                        Node::Range { msb, lsb } => {
                            let m = self.eval(msb).map(|v| v.to_i64() - offset);
                            let l = self.eval(lsb).map(|v| v.to_i64() - offset);
                            match (m, l) {
                                (Some(m), Some(l)) if m >= l => {
                                    let w = (m - l + 1) as u32;
                                    vec![(TargetPart::Select(decl, indices, m, l), w)]
                                }
                                _ => Vec::new(),
                            }
                        }
                        _ => match self.eval(sel) {
                            Some(v) => {
                                let i = v.to_i64() - offset;
                                vec![(TargetPart::Select(decl, indices, i, i), 1)]
                            }
                            None => Vec::new(),
                        },
                    },
                }
            }
            _ => Vec::new(),
        }
    }

    /// Applies a value to resolved target parts, most significant first.
    fn assign_parts(&mut self, parts: Vec<(TargetPart, u32)>, value: Bits) {
        let total: u32 = parts.iter().map(|(_, w)| w).sum();
        if total == 0 {
            return;
        }
        let value = value.resize(total).with_kind(Kind::Unsigned);
        let mut top = total;
        for (part, w) in parts {
            let lo = top - w;
            let slice = value.slice(top - 1, lo);
            self.store(&part, slice);
            top = lo;
        }
    }

    // ========================================================================
    // Statement execution
    // ========================================================================

    fn exec(&mut self, stmt: NodeId) {
        match self.ast.node(stmt).clone() {
            Node::SeqBlock { stmts, .. } => {
                for s in stmts {
                    self.exec(s);
                }
            }
            Node::BlockingAssign { lhs, rhs } => {
                if let Some(v) = self.eval(rhs) {
                    let parts = self.lvalue_parts(lhs);
                    self.assign_parts(parts, v);
                }
            }
            Node::NonblockingAssign { lhs, rhs } => {
                if let Some(v) = self.eval(rhs) {
                    let parts = self.lvalue_parts(lhs);
                    if !parts.is_empty() {
                        self.updates.push((parts, v));
                    }
                }
            }
            Node::ContAssign { lhs, rhs } => {
                if let Some(v) = self.eval(rhs) {
                    let parts = self.lvalue_parts(lhs);
                    self.assign_parts(parts, v);
                }
            }
            Node::NetDecl {
                name,
                init: Some(init),
                ..
            } => {
                // `wire x = e;` re-evaluated like a continuous assignment.
                if let Some(v) = self.eval(init) {
                    let parts = self.lvalue_parts(name);
                    self.assign_parts(parts, v);
                }
            }
            Node::If {
                cond,
                then_stmt,
                else_stmt,
            } => match self.eval(cond) {
                Some(c) if c.to_bool() => self.exec(then_stmt),
                Some(_) => {
                    if let Some(e) = else_stmt {
                        self.exec(e);
                    }
                }
                None => {}
            },
            Node::CaseStmt { cond, arms, .. } => {
                let Some(sel) = self.eval(cond) else { return };
                let mut default = None;
                for arm in arms {
                    let Node::CaseArm { labels, stmt } = self.ast.node(arm).clone() else {
                        continue;
                    };
                    if labels.is_empty() {
                        default.get_or_insert(stmt);
                        continue;
                    }
                    for label in labels {
                        if let Some(l) = self.eval(label) {
                            if l.logical_eq(&sel) {
                                self.exec(stmt);
                                return;
                            }
                        }
                    }
                }
                if let Some(d) = default {
                    self.exec(d);
                }
            }
            Node::For {
                init,
                cond,
                update,
                body,
            } => {
                self.exec(init);
                let mut n = 0u64;
                loop {
                    match self.eval(cond) {
                        Some(c) if c.to_bool() => {}
                        _ => break,
                    }
                    self.exec(body);
                    self.exec(update);
                    n += 1;
                    if n >= LOOP_LIMIT {
                        self.iface.error("loop iteration limit exceeded");
                        self.tasks = true;
                        break;
                    }
                }
            }
            Node::While { cond, body } => {
                let mut n = 0u64;
                loop {
                    match self.eval(cond) {
                        Some(c) if c.to_bool() => {}
                        _ => break,
                    }
                    self.exec(body);
                    n += 1;
                    if n >= LOOP_LIMIT {
                        self.iface.error("loop iteration limit exceeded");
                        self.tasks = true;
                        break;
                    }
                }
            }
            Node::RepeatStmt { count, body } => {
                let n = self.eval(count).map(|v| v.to_u64()).unwrap_or(0);
                for _ in 0..n.min(LOOP_LIMIT) {
                    self.exec(body);
                }
            }
            Node::Timing { stmt, .. } => {
                // Delays are parsed but not honored; nested event guards run
                // their body in place.
                self.exec(stmt);
            }
            Node::Display { args } => {
                let text = self.format_args(&args);
                self.iface.display(&text);
                self.tasks = true;
            }
            Node::Write { args } => {
                let text = self.format_args(&args);
                self.iface.write_text(&text);
                self.tasks = true;
            }
            Node::Finish { code } => {
                let code = code
                    .and_then(|c| self.eval(c))
                    .map(|v| v.to_u64() as u32)
                    .unwrap_or(0);
                self.iface.finish(code);
                self.tasks = true;
            }
            Node::ErrorTask { args } => {
                let text = self.format_args(&args);
                self.iface.error(&text);
                self.tasks = true;
            }
            Node::WarningTask { args } => {
                let text = self.format_args(&args);
                self.iface.warning(&text);
                self.tasks = true;
            }
            Node::InfoTask { args } => {
                let text = self.format_args(&args);
                self.iface.info(&text);
                self.tasks = true;
            }
            Node::Restart { path } => {
                if let Some(p) = self.string_arg(path) {
                    self.iface.restart(&p);
                }
                self.tasks = true;
            }
            Node::Retarget { target } => {
                if let Some(t) = self.string_arg(target) {
                    self.iface.retarget(&t);
                }
                self.tasks = true;
            }
            Node::Save { path } => {
                if let Some(p) = self.string_arg(path) {
                    self.iface.save(&p);
                }
                self.tasks = true;
            }
            Node::Get { fd, target } => {
                let fd = self
                    .eval(fd)
                    .map(|v| SId(v.to_u64() as u32))
                    .unwrap_or(SId(0));
                if let Some(token) = self.get_token(fd) {
                    if let Ok(v) = Bits::parse_radix(&token, 10) {
                        let parts = self.lvalue_parts(target);
                        self.assign_parts(parts, v);
                    }
                }
                self.tasks = true;
            }
            Node::Put { fd, expr } => {
                let fd = self
                    .eval(fd)
                    .map(|v| SId(v.to_u64() as u32))
                    .unwrap_or(SId(0));
                let text = match self.ast.node(expr).clone() {
                    Node::StringLit { val } => val,
                    _ => self
                        .eval(expr)
                        .and_then(|v| v.format_radix(10).ok())
                        .unwrap_or_default(),
                };
                self.iface.sputn(fd, text.as_bytes());
                self.tasks = true;
            }
            // Declarations inside blocks were handled at construction.
            n if n.is_decl() => {}
            _ => {}
        }
    }

    fn string_arg(&mut self, expr: NodeId) -> Option<String> {
        match self.ast.node(expr).clone() {
            Node::StringLit { val } => Some(val),
            _ => None,
        }
    }

    fn get_token(&self, fd: SId) -> Option<String> {
        loop {
            let c = self.iface.sgetc(fd);
            if c < 0 {
                return None;
            }
            if (c as u8 as char).is_whitespace() {
                self.iface.sbumpc(fd);
            } else {
                break;
            }
        }
        let mut token = String::new();
        loop {
            let c = self.iface.sgetc(fd);
            if c < 0 || (c as u8 as char).is_whitespace() {
                break;
            }
            token.push(c as u8 as char);
            self.iface.sbumpc(fd);
        }
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    // ========================================================================
    // Task argument formatting
    // ========================================================================

    fn format_args(&mut self, args: &[NodeId]) -> String {
        if let Some((&first, rest)) = args.split_first() {
            if let Node::StringLit { val } = self.ast.node(first).clone() {
                if val.contains('%') {
                    return self.format_with(&val, rest);
                }
            }
        }
        let mut out = String::new();
        for &arg in args {
            out.push_str(&self.render_arg(arg));
        }
        out
    }

    fn render_arg(&mut self, arg: NodeId) -> String {
        match self.ast.node(arg).clone() {
            Node::StringLit { val } => val,
            _ => self
                .eval(arg)
                .and_then(|v| v.format_radix(10).ok())
                .unwrap_or_else(|| "0".into()),
        }
    }

    fn format_with(&mut self, fmt: &str, args: &[NodeId]) -> String {
        let mut out = String::new();
        let mut args = args.iter();
        let mut chars = fmt.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some(d @ ('d' | 'b' | 'h' | 'o' | 'x')) => {
                    let base = match d {
                        'b' => 2,
                        'o' => 8,
                        'h' | 'x' => 16,
                        _ => 10,
                    };
                    let text = args
                        .next()
                        .and_then(|&a| self.eval(a))
                        .and_then(|v| v.format_radix(base).ok())
                        .unwrap_or_else(|| "0".into());
                    out.push_str(&text);
                }
                Some('c') => {
                    if let Some(v) = args.next().and_then(|&a| self.eval(a)) {
                        out.push((v.to_u64() as u8) as char);
                    }
                }
                Some('s') => {
                    if let Some(&a) = args.next() {
                        out.push_str(&self.render_arg(a));
                    }
                }
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }
        out
    }

    /// Packs a variable (all array elements, element zero lowest) into one
    /// value for state transfer.
    fn pack_var(&self, decl: NodeId) -> Bits {
        let Some(var) = self.vars.get(&decl) else {
            return Bits::zero(1);
        };
        if var.vals.len() == 1 {
            return var.vals[0].clone();
        }
        let mut out = var.vals[var.vals.len() - 1].clone();
        for v in var.vals[..var.vals.len() - 1].iter().rev() {
            out.concat(v);
        }
        out
    }

    fn unpack_var(&mut self, decl: NodeId, packed: &Bits) {
        let Some(var) = self.vars.get_mut(&decl) else {
            return;
        };
        if var.vals.len() == 1 {
            var.vals[0] = packed.resize(var.width);
            return;
        }
        let w = var.width;
        for (i, slot) in var.vals.iter_mut().enumerate() {
            let lo = i as u32 * w;
            let hi = lo + w - 1;
            *slot = if (hi as u64) < packed.width() as u64 {
                packed.slice(hi, lo)
            } else {
                packed.shr(lo as usize).resize(w)
            };
        }
    }
}

impl Core for SwLogic {
    fn get_state(&self) -> VarMap {
        let mut m = VarMap::new();
        for &(decl, vid) in &self.state_vids {
            m.insert(vid, self.pack_var(decl));
        }
        m.insert(self.init_vid, Bits::from_bool(self.ran_initial));
        m
    }

    fn set_state(&mut self, state: &VarMap) {
        for (decl, vid) in self.state_vids.clone() {
            if let Some(v) = state.get(&vid) {
                self.unpack_var(decl, v);
            }
        }
        if let Some(flag) = state.get(&self.init_vid) {
            self.ran_initial = flag.to_bool();
        }
    }

    fn get_input(&self) -> VarMap {
        let mut m = VarMap::new();
        for (&vid, &decl) in &self.input_vids {
            if let Some(var) = self.vars.get(&decl) {
                m.insert(vid, var.vals[0].clone());
            }
        }
        m
    }

    fn set_input(&mut self, input: &VarMap) {
        for (vid, decl) in self.input_vids.clone() {
            if let Some(v) = input.get(&vid) {
                if let Some(var) = self.vars.get_mut(&decl) {
                    let w = var.width;
                    var.vals[0] = v.resize(w);
                }
            }
        }
    }

    fn resync(&mut self) {
        for (i, p) in self.procs.iter().enumerate() {
            if matches!(p.kind, ProcKind::Comb) {
                self.active[i] = true;
            }
        }
    }

    fn read(&mut self, id: VId, bits: &Bits) {
        let Some(&decl) = self.input_vids.get(&id) else {
            return;
        };
        let Some(var) = self.vars.get_mut(&decl) else {
            return;
        };
        let new = bits.resize(var.width);
        if new == var.vals[0] {
            return;
        }
        let was = var.vals[0].get(0);
        let now = new.get(0);
        var.vals[0] = new;
        self.on_var_changed(decl, was, now);
    }

    fn evaluate(&mut self) {
        self.tasks = false;
        // Combinational state settles before initial bodies observe it.
        self.run_fixpoint();
        if !self.ran_initial {
            self.ran_initial = true;
            for i in 0..self.procs.len() {
                if matches!(self.procs[i].kind, ProcKind::Initial) {
                    let body = self.procs[i].body;
                    self.exec(body);
                }
            }
            self.run_fixpoint();
        }
    }

    fn there_are_updates(&self) -> bool {
        !self.updates.is_empty()
    }

    fn update(&mut self) {
        self.tasks = false;
        let pending = std::mem::take(&mut self.updates);
        for (parts, value) in pending {
            self.assign_parts(parts, value);
        }
        self.run_fixpoint();
    }

    fn there_were_tasks(&self) -> bool {
        self.tasks
    }

    fn open_loop(&mut self, clk: VId, val: bool, itrs: u64) -> u64 {
        if !self.input_vids.contains_key(&clk) {
            return 0;
        }
        let mut val = val;
        let mut consumed = 0;
        while consumed < itrs {
            val = !val;
            self.read(clk, &Bits::from_bool(val));
            let mut fired = false;
            self.evaluate();
            fired |= self.tasks;
            while self.there_are_updates() {
                self.update();
                fired |= self.tasks;
            }
            consumed += 1;
            if fired {
                break;
            }
        }
        consumed
    }

    fn is_logic(&self) -> bool {
        self.output_vids.is_empty() && self.input_vids.len() == 1
    }
}
