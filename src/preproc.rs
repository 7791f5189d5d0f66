// ─────────────────────────────────────────────────────────────────────────────
//  ino :: preproc
//
//  Turns a sketch (.ino / .pde) into compilable C++:
//
//      #include <Arduino.h>
//      void setup();          ← forward declarations for every
//      void loop();           ← top-level function with a body
//      #line 1 "blink.ino"
//      …original sketch text…
//
//  Prototype extraction is textual, not a parser.  Three passes:
//    1. strip   – literals, comments and directives become a single space
//    2. collapse – top-level `{…}` bodies are reduced to `{}`
//    3. match   – `type name(params) {` shapes are taken as signatures
//
//  Malformed input never fails; at worst the prototype list is incomplete
//  or holds a spurious entry.
// ─────────────────────────────────────────────────────────────────────────────

use std::sync::OnceLock;

use regex::Regex;

/// Forward declarations for every top-level function defined in `src`,
/// in source order, each terminated by `;`.
pub fn prototypes(src: &str) -> Vec<String> {
    let collapsed = collapse_braces(&strip(src));
    signature_re()
        .captures_iter(&collapsed)
        .filter_map(|c| c.get(1))
        .map(|m| format!("{};", m.as_str()))
        .collect()
}

/// Compilable source for one sketch file.
///
/// `header` is the umbrella core header (`Arduino.h`, or `WProgram.h` on
/// pre-1.0 distributions); `sketch_name` feeds the `#line` directive so
/// compiler diagnostics point into the original file.
pub fn render_sketch(src: &str, sketch_name: &str, header: &str) -> String {
    let mut out = format!("#include <{header}>\n");
    out.push_str(&prototypes(src).join("\n"));
    out.push_str(&format!("\n#line 1 \"{sketch_name}\"\n"));
    out.push_str(src);
    out
}

/// Replace character literals, string literals, comments and preprocessor
/// directives with a single space each.
pub fn strip(src: &str) -> String {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    let re = STRIP.get_or_init(|| {
        let pattern = [
            // character literal, escapes included: 'a' '\n' '\'' '\x41'
            r"'(?:\\.[^'\\\n]*|[^'\\\n])'",
            // string literal
            r#""(?:[^"\\]|\\.)*""#,
            // line comment
            r"//.*$",
            // block comment
            r"/\*(?s:.*?)\*/",
            // directive, backslash-continued lines included
            r"^[ \t]*#(?:[^\n]*\\\r?\n)*[^\n]*",
        ]
        .join("|");
        Regex::new(&format!("(?m){pattern}")).expect("static regex")
    });
    re.replace_all(src, " ").into_owned()
}

/// Drop the interior of every top-level brace pair, keeping the braces.
///
/// `int f(int x) { return x; }` becomes `int f(int x) {}`.  A stray `}` at
/// depth zero is kept as text and does not push the depth negative.
pub fn collapse_braces(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut depth: usize = 0;

    for c in src.chars() {
        match c {
            '{' => {
                if depth == 0 {
                    out.push(c);
                }
                depth += 1;
            }
            '}' => {
                if depth <= 1 {
                    out.push(c);
                }
                depth = depth.saturating_sub(1);
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn signature_re() -> &'static Regex {
    static SIG: OnceLock<Regex> = OnceLock::new();
    SIG.get_or_init(|| {
        Regex::new(r"([\w\[\]\*]+\s+[&\[\]\*\w\s]+\([&,\[\]\*\w\s]*\))\s*\{").expect("static regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_function() {
        assert_eq!(
            prototypes("int add(int a, int b) {\n  return a + b;\n}"),
            vec!["int add(int a, int b);"]
        );
    }

    #[test]
    fn blink_sketch() {
        let src = "\
#define LED 13

// the setup routine
void setup() {
  pinMode(LED, OUTPUT);
}

void loop() {
  if (digitalRead(2)) {
    blink(100);
  }
}

static void blink(unsigned long ms) {
  digitalWrite(LED, HIGH); delay(ms);
}
";
        assert_eq!(
            prototypes(src),
            vec![
                "void setup();",
                "void loop();",
                "static void blink(unsigned long ms);",
            ]
        );
    }

    #[test]
    fn macro_bodies_never_leak() {
        let src = "#define FOO(a,b) ((a)+(b))\nint twice(int x) { return FOO(x, x); }\n";
        let protos = prototypes(src);
        assert_eq!(protos, vec!["int twice(int x);"]);
        assert!(protos.iter().all(|p| !p.contains("FOO")));
    }

    #[test]
    fn continued_directive_is_stripped_whole() {
        let src = "#define SUM(a, b) \\\n  int sum(a, b) { }\nvoid go() {}\n";
        assert_eq!(prototypes(src), vec!["void go();"]);
    }

    #[test]
    fn braces_in_literals_do_not_count() {
        let src = "\
void greet() {
  char* s = \"{ not a brace }\";
  char c = '}';
  Serial.println(s);
}
int after(int x) { return x; }
";
        assert_eq!(prototypes(src), vec!["void greet();", "int after(int x);"]);
    }

    #[test]
    fn comments_hide_code() {
        let src = "/* int hidden() { } */\n// void nope() {}\nvoid shown() {}\n";
        assert_eq!(prototypes(src), vec!["void shown();"]);
    }

    #[test]
    fn declarations_without_body_are_skipped() {
        let src = "int declared(int);\nint *ptr(char **argv, int n[]) { return 0; }\n";
        assert_eq!(prototypes(src), vec!["int *ptr(char **argv, int n[]);"]);
    }

    #[test]
    fn collapse_keeps_only_outer_braces() {
        assert_eq!(
            collapse_braces("void f() { if (x) { y(); } }\nint g;"),
            "void f() {}\nint g;"
        );
    }

    #[test]
    fn malformed_input_degrades_gracefully() {
        assert_eq!(prototypes("void broken( {"), Vec::<String>::new());
        assert_eq!(prototypes("}} void ok() {} {{"), vec!["void ok();"]);
        assert_eq!(prototypes("\"unterminated"), Vec::<String>::new());
    }

    #[test]
    fn rendered_sketch_layout() {
        let out = render_sketch("void setup() {}\nvoid loop() {}\n", "blink.ino", "Arduino.h");
        assert_eq!(
            out,
            "#include <Arduino.h>\nvoid setup();\nvoid loop();\n#line 1 \"blink.ino\"\nvoid setup() {}\nvoid loop() {}\n"
        );
    }
}
