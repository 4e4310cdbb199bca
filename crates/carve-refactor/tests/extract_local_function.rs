use carve_config::{BodyForm, StaticPreference, StyleOptions};
use carve_refactor::{
    CaptureMode, Direction, ExtractIssue, ExtractLocalFunction, ExtractOptions, FileId, LocalFunctionEdit,
    SelectionKind, VariableRole,
};
use carve_test_utils::{assert_text_with_rename, extract_selection};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn file() -> FileId {
    FileId::new("Program.cs")
}

fn apply(fixture: &str, options: ExtractOptions) -> (String, LocalFunctionEdit) {
    let (source, selection) = extract_selection(fixture);
    let refactoring = ExtractLocalFunction::new(file(), selection).with_options(options);
    let edit = refactoring
        .apply(&source)
        .unwrap_or_else(|| panic!("expected extraction to apply, analysis: {:?}", refactoring.analyze(&source)));
    let actual = edit.edit.apply_to(&file(), &source).unwrap();
    (actual, edit)
}

#[track_caller]
fn check(fixture: &str, expected: &str) {
    check_with(fixture, ExtractOptions::default(), expected);
}

#[track_caller]
fn check_with(fixture: &str, options: ExtractOptions, expected: &str) {
    let (actual, edit) = apply(fixture, options);
    assert_text_with_rename(&actual, Some(edit.rename_range), expected);
}

#[track_caller]
fn check_rejected(fixture: &str, issue: ExtractIssue) {
    let (source, selection) = extract_selection(fixture);
    let refactoring = ExtractLocalFunction::new(file(), selection);
    let analysis = refactoring.analyze(&source);
    assert_eq!(analysis.issues, vec![issue]);
    assert!(refactoring.apply(&source).is_none());
}

fn with_style(update: impl FnOnce(&mut StyleOptions)) -> ExtractOptions {
    let mut style = StyleOptions::default();
    update(&mut style);
    ExtractOptions::from_style(style)
}

const CONDITION: &str = r#"
class Program
{
    static void Main(string[] args)
    {
        bool b = true;
        System.Console.WriteLine([|b != true|] ? b = true : b = false);
    }
}
"#;

#[test]
fn expression_becomes_static_local_function() {
    check(
        CONDITION,
        r#"
class Program
{
    static void Main(string[] args)
    {
        bool b = true;
        System.Console.WriteLine({|Rename:NewMethod|}(b) ? b = true : b = false);

        static bool NewMethod(bool b)
        {
            return b != true;
        }
    }
}
"#,
    );
}

#[test]
fn preview_shows_the_call_and_the_new_function() {
    let (source, selection) = extract_selection(CONDITION);
    let edit = ExtractLocalFunction::new(file(), selection).apply(&source).unwrap();

    let preview = edit.preview(&file(), &source).unwrap();

    assert_eq!((preview.lines_added, preview.lines_removed), (6, 1));
    assert!(preview
        .unified_diff
        .contains("-        System.Console.WriteLine(b != true ? b = true : b = false);\n"));
    assert!(preview.unified_diff.contains("+        static bool NewMethod(bool b)\n"));
}

#[test]
fn static_preference_never_drops_the_modifier() {
    check_with(
        CONDITION,
        with_style(|style| style.prefer_static_local_function.value = StaticPreference::Never),
        r#"
class Program
{
    static void Main(string[] args)
    {
        bool b = true;
        System.Console.WriteLine({|Rename:NewMethod|}(b) ? b = true : b = false);

        bool NewMethod(bool b)
        {
            return b != true;
        }
    }
}
"#,
    );
}

#[test]
fn expression_body_when_possible() {
    check_with(
        CONDITION,
        with_style(|style| style.local_function_body.value = BodyForm::WhenPossible),
        r#"
class Program
{
    static void Main(string[] args)
    {
        bool b = true;
        System.Console.WriteLine({|Rename:NewMethod|}(b) ? b = true : b = false);

        static bool NewMethod(bool b) => b != true;
    }
}
"#,
    );
}

#[test]
fn multi_line_expression_keeps_a_block_body_when_on_single_line_is_required() {
    check_with(
        r#"
class Program
{
    static void Main(string[] args)
    {
        bool b = true;
        System.Console.WriteLine([|b !=
            true|] ? b = true : b = false);
    }
}
"#,
        with_style(|style| style.local_function_body.value = BodyForm::WhenOnSingleLine),
        r#"
class Program
{
    static void Main(string[] args)
    {
        bool b = true;
        System.Console.WriteLine({|Rename:NewMethod|}(b) ? b = true : b = false);

        static bool NewMethod(bool b)
        {
            return b !=
                true;
        }
    }
}
"#,
    );
}

#[test]
fn reads_become_parameters_in_declaration_order() {
    check(
        r#"
class Program
{
    static void Main(string[] args)
    {
        int x = 1;
        object y = 0;
        [|int s = true ? fun(x) : fun(y);|]
    }

    private static T fun<T>(T t)
    {
        return t;
    }
}
"#,
        r#"
class Program
{
    static void Main(string[] args)
    {
        int x = 1;
        object y = 0;
        {|Rename:NewMethod|}(x, y);

        static void NewMethod(int x, object y)
        {
            int s = true ? fun(x) : fun(y);
        }
    }

    private static T fun<T>(T t)
    {
        return t;
    }
}
"#,
    );
}

#[test]
fn namespace_selection_extracts_the_statement() {
    check(
        r#"
class Program
{
    void Main()
    {
        [|System|].Console.WriteLine(4);
    }
}
"#,
        r#"
class Program
{
    void Main()
    {
        {|Rename:NewMethod|}();

        static void NewMethod()
        {
            System.Console.WriteLine(4);
        }
    }
}
"#,
    );
}

#[test]
fn base_access_keeps_the_function_non_static() {
    check(
        r#"
class Program
{
    void Main()
    {
        [|base|].ToString();
    }
}
"#,
        r#"
class Program
{
    void Main()
    {
        {|Rename:NewMethod|}();

        void NewMethod()
        {
            base.ToString();
        }
    }
}
"#,
    );
}

#[test]
fn delegate_property_invoked_in_place() {
    check(
        r#"
using System;

class C
{
    static Action X { get; }

    static void Main()
    {
        [|C.X|]();
    }
}
"#,
        r#"
using System;

class C
{
    static Action X { get; }

    static void Main()
    {
        {|Rename:GetX|}()();

        static Action GetX()
        {
            return C.X;
        }
    }
}
"#,
    );
}

#[test]
fn hoisted_declarations_keep_comments_in_the_body() {
    check(
        r#"
class Construct
{
    public void Do() { }

    static void Main(string[] args)
    {
        [|Construct obj1 = new Construct();
        obj1.Do();
        /* Interesting comment. */
        Construct obj2 = new Construct();
        obj2.Do();|]
        obj1.Do();
        obj2.Do();
    }
}
"#,
        r#"
class Construct
{
    public void Do() { }

    static void Main(string[] args)
    {
        Construct obj1, obj2;
        {|Rename:NewMethod|}(out obj1, out obj2);
        obj1.Do();
        obj2.Do();

        static void NewMethod(out Construct obj1, out Construct obj2)
        {
            obj1 = new Construct();
            obj1.Do();
            /* Interesting comment. */
            obj2 = new Construct();
            obj2.Do();
        }
    }
}
"#,
    );
}

#[test]
fn multi_declarator_statement_is_split_into_assignments() {
    check(
        r#"
class Construct
{
    public void Do() { }

    static void Main(string[] args)
    {
        [|Construct obj1 = new Construct();
        obj1.Do();
        Construct obj2 = new Construct(), obj3 = new Construct();
        obj2.Do();
        obj3.Do();|]
        obj1.Do();
        obj2.Do();
        obj3.Do();
    }
}
"#,
        r#"
class Construct
{
    public void Do() { }

    static void Main(string[] args)
    {
        Construct obj1, obj2, obj3;
        {|Rename:NewMethod|}(out obj1, out obj2, out obj3);
        obj1.Do();
        obj2.Do();
        obj3.Do();

        static void NewMethod(out Construct obj1, out Construct obj2, out Construct obj3)
        {
            obj1 = new Construct();
            obj1.Do();
            obj2 = new Construct();
            obj3 = new Construct();
            obj2.Do();
            obj3.Do();
        }
    }
}
"#,
    );
}

#[test]
fn single_output_is_returned() {
    check(
        r#"
class Program
{
    static void Main()
    {
        int a = 2;
        [|int b = a * a;
        b += a;|]
        System.Console.WriteLine(b);
    }
}
"#,
        r#"
class Program
{
    static void Main()
    {
        int a = 2;
        int b = {|Rename:NewMethod|}(a);
        System.Console.WriteLine(b);

        static int NewMethod(int a)
        {
            int b = a * a;
            b += a;
            return b;
        }
    }
}
"#,
    );
}

#[test]
fn initializer_with_semicolon_selects_the_declaration() {
    check(
        r#"
class Program
{
    static void Main(string[] args)
    {
        var (x, y) = (1, 2);
        var z = [|3;|]
        System.Console.WriteLine(z);
    }
}
"#,
        r#"
class Program
{
    static void Main(string[] args)
    {
        var (x, y) = (1, 2);
        int z = {|Rename:NewMethod|}();
        System.Console.WriteLine(z);

        static int NewMethod()
        {
            return 3;
        }
    }
}
"#,
    );
}

const OUT_VAR: &str = r#"
class C
{
    static int M1(out int y, int i)
    {
        y = i;
        return i;
    }

    static void M(int i)
    {
        int r;
        [|r = M1(out int y, i);|]
        System.Console.WriteLine(r + y);
    }
}
"#;

#[test]
fn out_variable_declaration_moves_to_the_call_site() {
    check(
        OUT_VAR,
        r#"
class C
{
    static int M1(out int y, int i)
    {
        y = i;
        return i;
    }

    static void M(int i)
    {
        int r;
        int y;
        {|Rename:NewMethod|}(i, out r, out y);
        System.Console.WriteLine(r + y);

        static void NewMethod(int i, out int r, out int y)
        {
            r = M1(out y, i);
        }
    }
}
"#,
    );
}

#[test]
fn out_variable_analysis() {
    let (source, selection) = extract_selection(OUT_VAR);
    let analysis = ExtractLocalFunction::new(file(), selection).analyze(&source);
    assert!(analysis.is_extractable());
    assert_eq!(analysis.kind, Some(SelectionKind::Statements));

    let role = |name: &str| {
        let fact = analysis
            .variables
            .facts
            .iter()
            .find(|fact| fact.name.as_str() == name)
            .unwrap();
        (fact.role, fact.hoisted)
    };
    assert_eq!(role("i"), (VariableRole::Parameter(Direction::In), false));
    assert_eq!(role("r"), (VariableRole::Parameter(Direction::Out), false));
    assert_eq!(role("y"), (VariableRole::Parameter(Direction::Out), true));

    let signature = analysis.signature.unwrap();
    assert_eq!(signature.capture, CaptureMode::NoEnclosingState);
    assert_eq!(signature.name.as_str(), "NewMethod");
}

#[test]
fn pattern_variable_is_reported_as_a_conflict() {
    let fixture = r#"
class C
{
    static int M1(bool b, int i) => i;

    static void M(int i)
    {
        int r;
        [|r = M1(3 is int y, i);|]
        System.Console.WriteLine(r + y);
    }
}
"#;
    let (actual, edit) = apply(fixture, ExtractOptions::default());
    assert_text_with_rename(
        &actual,
        Some(edit.rename_range),
        r#"
class C
{
    static int M1(bool b, int i) => i;

    static void M(int i)
    {
        int r;
        int y;
        {|Rename:NewMethod|}(i, out r, out y);
        System.Console.WriteLine(r + y);

        static void NewMethod(int i, out int r, out int y)
        {
            r = M1(3 is int y, i);
        }
    }
}
"#,
    );

    let function_start = actual.find("static void NewMethod").unwrap();
    assert_eq!(edit.conflict_ranges.len(), 1);
    let conflict = edit.conflict_ranges[0];
    assert_eq!(conflict.slice(&actual), "y");
    assert!(conflict.start > function_start);
}

#[test]
fn out_variable_type_is_removed_around_comments() {
    let fixture = r#"
class C
{
    static int M1(out int y)
    {
        y = 1;
        return 0;
    }

    static int M2(bool b) => 0;

    static void M()
    {
        int r;
        [|r = M1(out /*out*/ int /*int*/ y /*y*/) + M2(3 is int z);|]
        System.Console.WriteLine(r + y + z);
    }
}
"#;
    let (actual, edit) = apply(fixture, ExtractOptions::default());
    assert_text_with_rename(
        &actual,
        Some(edit.rename_range),
        r#"
class C
{
    static int M1(out int y)
    {
        y = 1;
        return 0;
    }

    static int M2(bool b) => 0;

    static void M()
    {
        int r;
        int y, z;
        {|Rename:NewMethod|}(out r, out y, out z);
        System.Console.WriteLine(r + y + z);

        static void NewMethod(out int r, out int y, out int z)
        {
            r = M1(out /*out*/  /*int*/ y /*y*/) + M2(3 is int z);
        }
    }
}
"#,
    );
    assert_eq!(edit.conflict_ranges.len(), 1);
    assert_eq!(edit.conflict_ranges[0].slice(&actual), "z");
}

#[test]
fn cancellation_token_goes_last() {
    check(
        r#"
using System;
using System.Threading;

class C
{
    void M(CancellationToken ct)
    {
        var v = 0;

        [|if (true)
        {
            ct.ThrowIfCancellationRequested();
            Console.WriteLine(v);
        }|]
    }
}
"#,
        r#"
using System;
using System.Threading;

class C
{
    void M(CancellationToken ct)
    {
        var v = 0;

        {|Rename:NewMethod|}(v, ct);

        static void NewMethod(int v, CancellationToken ct)
        {
            if (true)
            {
                ct.ThrowIfCancellationRequested();
                Console.WriteLine(v);
            }
        }
    }
}
"#,
    );
}

#[test]
fn readonly_member_calls_in_a_struct_make_the_function_readonly() {
    check(
        r#"
struct S1
{
    readonly int M1() => 42;
    void Main()
    {
        [|int i = M1() + M1()|];
    }
}
"#,
        r#"
struct S1
{
    readonly int M1() => 42;
    void Main()
    {
        {|Rename:NewMethod|}();

        readonly void NewMethod()
        {
            int i = M1() + M1();
        }
    }
}
"#,
    );
}

#[test]
fn maybe_null_local_keeps_its_annotation() {
    check(
        r#"
#nullable enable

using System;

class C
{
    void M()
    {
        object? o = null;
        var s = (string?)[|o|];
        Console.WriteLine(s);
    }
}
"#,
        r#"
#nullable enable

using System;

class C
{
    void M()
    {
        object? o = null;
        var s = (string?){|Rename:GetO|}(o);
        Console.WriteLine(s);

        static object? GetO(object? o)
        {
            return o;
        }
    }
}
"#,
    );
}

#[test]
fn not_null_local_loses_its_annotation() {
    check(
        r#"
#nullable enable

using System;

class C
{
    void M()
    {
        object? o = new object();
        var s = (string)[|o|];
        Console.WriteLine(s);
    }
}
"#,
        r#"
#nullable enable

using System;

class C
{
    void M()
    {
        object? o = new object();
        var s = (string){|Rename:GetO|}(o);
        Console.WriteLine(s);

        static object GetO(object o)
        {
            return o;
        }
    }
}
"#,
    );
}

#[test]
fn conditional_access_result_may_be_null() {
    check(
        r#"
#nullable enable

class C
{
    string? M(string? a)
    {
        return [|a?.ToString()|];
    }
}
"#,
        r#"
#nullable enable

class C
{
    string? M(string? a)
    {
        return {|Rename:NewMethod|}(a);

        static string? NewMethod(string? a)
        {
            return a?.ToString();
        }
    }
}
"#,
    );
}

#[test]
fn conditional_access_on_a_concatenation_may_be_null() {
    check(
        r#"
#nullable enable

class C
{
    public string M()
    {
        string? a = null;
        string? b = null;
        return [|(a + b + a)?.ToString()|] ?? string.Empty;
    }
}
"#,
        r#"
#nullable enable

class C
{
    public string M()
    {
        string? a = null;
        string? b = null;
        return {|Rename:NewMethod|}(a, b) ?? string.Empty;

        static string? NewMethod(string? a, string? b)
        {
            return (a + b + a)?.ToString();
        }
    }
}
"#,
    );
}

#[test]
fn concatenation_of_nullable_strings_returns_string() {
    check(
        r#"
#nullable enable

class C
{
    string M(string? a, string? b)
    {
        [|var c = a + b;|]
        return c;
    }
}
"#,
        r#"
#nullable enable

class C
{
    string M(string? a, string? b)
    {
        string c = {|Rename:NewMethod|}(a, b);
        return c;

        static string NewMethod(string? a, string? b)
        {
            var c = a + b;
            return c;
        }
    }
}
"#,
    );
}

#[test]
fn ref_parameters_keep_the_widest_state() {
    check(
        r#"
#nullable enable

class C
{
    public string M()
    {
        string? a = string.Empty;
        string? b = string.Empty;
        [|string? c = a + b;
        a = string.Empty;
        b = string.Empty;
        a = null;
        b = null;
        c = null;
        c = a + b;|]
        return c ?? string.Empty;
    }
}
"#,
        r#"
#nullable enable

class C
{
    public string M()
    {
        string? a = string.Empty;
        string? b = string.Empty;
        string? c = {|Rename:NewMethod|}(ref a, ref b);
        return c ?? string.Empty;

        static string NewMethod(ref string? a, ref string? b)
        {
            string? c = a + b;
            a = string.Empty;
            b = string.Empty;
            a = null;
            b = null;
            c = null;
            c = a + b;
            return c;
        }
    }
}
"#,
    );
}

#[test]
fn initializer_names_the_function() {
    check(
        r#"
#nullable enable

using System;

class C
{
    void M()
    {
        object? o = new object();
        var s = [|(string)o|];
        Console.WriteLine(s);
    }
}
"#,
        r#"
#nullable enable

using System;

class C
{
    void M()
    {
        object? o = new object();
        var s = {|Rename:GetS|}(o);
        Console.WriteLine(s);

        static string GetS(object o)
        {
            return (string)o;
        }
    }
}
"#,
    );
}

#[test]
fn existing_local_function_name_gets_a_suffix() {
    check(
        r#"
class Test
{
    static void Main(string[] args)
    {
        [|var test = 1;|]

        static void NewMethod()
        {
            var test = 1;
        }
    }
}
"#,
        r#"
class Test
{
    static void Main(string[] args)
    {
        {|Rename:NewMethod1|}();

        static void NewMethod()
        {
            var test = 1;
        }

        static void NewMethod1()
        {
            var test = 1;
        }
    }
}
"#,
    );
}

#[test]
fn nested_host_skips_every_taken_suffix() {
    check(
        r#"
class Test
{
    static void Main(string[] args)
    {
        static void NewMethod()
        {
            var NewMethod2 = 0;
            [|var test = 1;|]

            static void NewMethod1()
            {
                var test = 1;
            }
        }
    }
}
"#,
        r#"
class Test
{
    static void Main(string[] args)
    {
        static void NewMethod()
        {
            var NewMethod2 = 0;
            {|Rename:NewMethod2|}();

            static void NewMethod1()
            {
                var test = 1;
            }

            static void NewMethod2()
            {
                var test = 1;
            }
        }
    }
}
"#,
    );
}

#[test]
fn local_function_declared_in_the_selection_moves_along() {
    check(
        r#"
class Test
{
    static void Main(string[] args)
    {
        [|ExistingLocalFunction();

        void ExistingLocalFunction()
        {
        }|]
    }
}
"#,
        r#"
class Test
{
    static void Main(string[] args)
    {
        {|Rename:NewMethod|}();

        static void NewMethod()
        {
            ExistingLocalFunction();

            void ExistingLocalFunction()
            {
            }
        }
    }
}
"#,
    );
}

#[test]
fn embedded_statement_with_return_is_wrapped_in_a_block() {
    check(
        r#"
using System;

class Program
{
    void Test()
    {
        if (true)
            [|if (true)
                return;|]
        Console.WriteLine();
    }
}
"#,
        r#"
using System;

class Program
{
    void Test()
    {
        if (true)
        {
            {|Rename:NewMethod|}();
            return;
        }
        Console.WriteLine();

        static void NewMethod()
        {
            if (true)
                return;
        }
    }
}
"#,
    );
}

#[test]
fn base_name_option_replaces_the_suggestion() {
    let options = ExtractOptions {
        base_name: Some("IsUnset".to_owned()),
        ..ExtractOptions::default()
    };
    let (actual, edit) = apply(CONDITION, options);
    assert_eq!(edit.signature.name.as_str(), "IsUnset");
    assert_eq!(edit.rename_range.slice(&actual), "IsUnset");
    assert!(actual.contains("static bool IsUnset(bool b)"));
}

const OVERLOADED_GOO: &str = r#"
    static void Goo<T, S>(Func<S, T> p, Func<T, S> q, T r, S s) { Console.WriteLine(1); }
    static void Goo(Func<byte, byte> p, Func<byte, byte> q, int r, int s) { Console.WriteLine(2); }
}
"#;

#[test]
fn lambda_argument_casts_its_sibling_to_keep_the_generic_overload() {
    check(
        &format!(
            r#"
using System;

class Program
{{
    static void Main()
    {{
        byte z = 0;
        Goo([|x => 0|], y => 0, z, z);
    }}
{OVERLOADED_GOO}"#
        ),
        &format!(
            r#"
using System;

class Program
{{
    static void Main()
    {{
        byte z = 0;
        Goo({{|Rename:NewMethod|}}(), y => (byte)0, z, z);

        static Func<byte, byte> NewMethod()
        {{
            return x => 0;
        }}
    }}
{OVERLOADED_GOO}"#
        ),
    );
}

#[test]
fn block_lambda_sibling_casts_its_return_value() {
    check(
        &format!(
            r#"
using System;

class Program
{{
    static void Main()
    {{
        byte z = 0;
        Goo([|x => 0|], y => {{ return 0; }}, z, z);
    }}
{OVERLOADED_GOO}"#
        ),
        &format!(
            r#"
using System;

class Program
{{
    static void Main()
    {{
        byte z = 0;
        Goo({{|Rename:NewMethod|}}(), y => {{ return (byte)0; }}, z, z);

        static Func<byte, byte> NewMethod()
        {{
            return x => 0;
        }}
    }}
{OVERLOADED_GOO}"#
        ),
    );
}

const EXTENSION_OVERLOADS: &str = r#"
using System;

static class C
{
    static void Ex(this string x)
    {
    }

    static void Inner(Action<string> x, string y)
    {
    }

    static void Inner(Action<string> x, int y)
    {
    }

    static void Inner(Action<int> x, int y)
    {
    }

    static void Outer(Action<string> x, object y)
    {
        Console.WriteLine(1);
    }

    static void Outer(Action<int> x, int y)
    {
        Console.WriteLine(2);
    }

    static void Main()
    {
        MAIN
    }
}

static class E
{
    public static void Ex(this int x)
    {
    }
}
"#;

#[test]
fn prefix_operator_argument_is_cast_without_extra_parentheses() {
    check(
        &EXTENSION_OVERLOADS.replace("MAIN", "Outer(y => Inner(x => [|x|].Ex(), y), - -1);"),
        &EXTENSION_OVERLOADS.replace(
            "MAIN",
            "Outer(y => Inner(x => {|Rename:GetX|}(x).Ex(), y), (object)- -1);\n\n        static string GetX(string x)\n        {\n            return x;\n        }",
        ),
    );
}

#[test]
fn return_after_an_unconditional_goto_is_extracted() {
    check(
        r#"
delegate int del(int i);

class C
{
    static void Main(string[] args)
    {
        del q = x => {
            goto label2;
            [|return x * x;|]
        };
    label2:
        return;
    }
}
"#,
        r#"
delegate int del(int i);

class C
{
    static void Main(string[] args)
    {
        del q = x => {
            goto label2;
            return {|Rename:NewMethod|}(x);
        };
    label2:
        return;

        static int NewMethod(int x)
        {
            return x * x;
        }
    }
}
"#,
    );
}

#[test]
fn goto_leaving_the_selection_is_rejected() {
    check_rejected(
        r#"
delegate int del(int i);

class C
{
    static void Main(string[] args)
    {
        del q = x => {
            [|goto label2;
            return x * x;|]
        };
    label2:
        return;
    }
}
"#,
        ExtractIssue::JumpOutOfSelection,
    );
}

#[test]
fn partial_return_is_rejected() {
    check_rejected(
        r#"
class C
{
    void M(int x)
    {
        [|if (x > 0)
            return;|]
        System.Console.WriteLine(x);
    }
}
"#,
        ExtractIssue::ReturnWithReachableEnd,
    );
}

#[test]
fn break_out_of_the_selection_is_rejected() {
    check_rejected(
        r#"
class C
{
    void M(int x)
    {
        while (true)
        {
            [|break;|]
        }
    }
}
"#,
        ExtractIssue::JumpOutOfSelection,
    );
}

#[test]
fn assignment_target_is_rejected() {
    check_rejected(
        r#"
class C
{
    void M()
    {
        int x;
        [|x|] = 1;
    }
}
"#,
        ExtractIssue::AssignmentTarget,
    );
}

#[test]
fn lone_local_function_is_rejected() {
    check_rejected(
        r#"
class C
{
    void M()
    {
        [|void F()
        {
        }|]
        F();
    }
}
"#,
        ExtractIssue::DeclarationOnly,
    );
}

#[test]
fn local_function_used_after_the_selection_is_rejected() {
    check_rejected(
        r#"
class C
{
    void M()
    {
        [|F();
        void F()
        {
        }|]
        F();
    }
}
"#,
        ExtractIssue::DeclarationUsedOutside,
    );
}

#[test]
fn whitespace_selection_is_rejected() {
    let source = "class C\n{\n    void M()\n    {\n        \n    }\n}\n";
    let start = source.find("        \n").unwrap();
    let selection = carve_refactor::TextRange::new(start, start + 8);
    let analysis = ExtractLocalFunction::new(file(), selection).analyze(source);
    assert_eq!(analysis.issues, vec![ExtractIssue::EmptySelection]);
}

#[test]
fn field_initializer_is_not_extractable() {
    let (source, selection) = extract_selection("class C\n{\n    int f = [|1 + 2|];\n}\n");
    let analysis = ExtractLocalFunction::new(file(), selection).analyze(&source);
    assert!(!analysis.is_extractable());
    assert_eq!(analysis.kind, None);
}

#[test]
fn cancellation_stops_the_refactoring() {
    let (source, selection) = extract_selection(CONDITION);
    let refactoring = ExtractLocalFunction::new(file(), selection);
    assert!(refactoring.apply_with_cancellation(&source, &|| true).is_none());
    assert!(refactoring.apply_with_cancellation(&source, &|| false).is_some());
}

#[test]
fn fixtures() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata");
    carve_test_utils::assert_fixture_transformed(&root.join("before"), &root.join("after"), |_, text| {
        let (source, selection) = extract_selection(text);
        let edit = ExtractLocalFunction::new(file(), selection)
            .apply(&source)
            .expect("fixture extracts");
        let actual = edit.edit.apply_to(&file(), &source).unwrap();
        carve_test_utils::mark_rename(&actual, edit.rename_range)
    });
}

const ARBITRARY: &str = r#"
class Program
{
    static int Twice(int v) => v * 2;

    void Run(int[] items, string? label)
    {
        var total = 0;
        foreach (var item in items)
        {
            if (item < 0)
                continue;
            total += Twice(item);
        }
        label ??= "none";
        System.Console.WriteLine(label + total);
    }
}
"#;

proptest! {
    #[test]
    fn arbitrary_selections_never_panic(start in 0usize..ARBITRARY.len(), len in 0usize..120) {
        let end = (start + len).min(ARBITRARY.len());
        let refactoring = ExtractLocalFunction::new(file(), carve_refactor::TextRange::new(start, end));
        let analysis = refactoring.analyze(ARBITRARY);
        if let Some(edit) = refactoring.apply(ARBITRARY) {
            prop_assert!(analysis.is_extractable());
            let actual = edit.edit.apply_to(&file(), ARBITRARY).unwrap();
            prop_assert!(actual.contains(edit.function_text.as_str()));
            prop_assert_eq!(edit.rename_range.slice(&actual), edit.signature.name.as_str());
        }
    }
}
