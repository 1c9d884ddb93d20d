//! Static catalog of the data operations the reasoner may request. The
//! catalog is fixed at compile time: capabilities are never added or removed
//! at runtime, and every entry is side-effect-free from the caller's
//! perspective.

use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

impl ParamKind {
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Clone, Copy, Debug)]
pub struct CapabilityDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static [ParamSpec],
}

impl CapabilityDescriptor {
    /// JSON-Schema object shape both provider wire formats accept.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in self.parameters {
            properties.insert(
                param.name.to_string(),
                json!({ "type": param.kind.json_type(), "description": param.description }),
            );
            if param.required {
                required.push(Value::String(param.name.to_string()));
            }
        }
        json!({ "type": "object", "properties": properties, "required": required })
    }
}

const fn param(
    name: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> ParamSpec {
    ParamSpec { name, kind, required, description }
}

static CATALOG: &[CapabilityDescriptor] = &[
    CapabilityDescriptor {
        name: "get_facturas",
        description: "Obtiene facturas entre dos fechas con filtros opcionales de proveedor, \
                      país, importe, categoría y moneda.",
        parameters: &[
            param("desde", ParamKind::String, true, "Fecha inicio YYYY-MM-DD"),
            param("hasta", ParamKind::String, true, "Fecha fin YYYY-MM-DD"),
            param("proveedor", ParamKind::String, false, "Búsqueda parcial por proveedor, ej. \"Meta\""),
            param("pais_origen", ParamKind::String, false, "País de origen, ej. \"ES\""),
            param("importe_min", ParamKind::Number, false, "Importe mínimo en EUR"),
            param("importe_max", ParamKind::Number, false, "Importe máximo en EUR"),
            param("categoria", ParamKind::String, false, "Categoría, ej. \"Marketing\""),
            param("moneda", ParamKind::String, false, "Moneda, ej. \"EUR\""),
            param("limit", ParamKind::Integer, false, "Límite de resultados (máx 1000)"),
        ],
    },
    CapabilityDescriptor {
        name: "get_ventas",
        description: "Obtiene ventas entre dos fechas (formato YYYY-MM-DD).",
        parameters: &[
            param("desde", ParamKind::String, true, "Fecha inicio YYYY-MM-DD"),
            param("hasta", ParamKind::String, true, "Fecha fin YYYY-MM-DD"),
        ],
    },
    CapabilityDescriptor {
        name: "get_dashboard",
        description: "Obtiene el resumen de los últimos 6 meses (ventas, gastos, facturas).",
        parameters: &[],
    },
    CapabilityDescriptor {
        name: "get_historico",
        description: "Obtiene el histórico de operaciones recientes.",
        parameters: &[param(
            "limit",
            ParamKind::Integer,
            false,
            "Número máximo de operaciones (default 10)",
        )],
    },
    CapabilityDescriptor {
        name: "filter_data",
        description: "Filtra una lista de datos ya obtenidos por campo y valor.",
        parameters: &[
            param("data", ParamKind::Array, true, "Lista de registros a filtrar"),
            param("campo", ParamKind::String, true, "Campo por el que filtrar"),
            param("valor", ParamKind::String, true, "Valor a buscar"),
        ],
    },
    CapabilityDescriptor {
        name: "aggregate_data",
        description: "Agrega datos numéricos de una lista ya obtenida (sum, count, avg).",
        parameters: &[
            param("data", ParamKind::Array, true, "Lista de registros"),
            param("operation", ParamKind::String, true, "Operación: sum, count o avg"),
            param("field", ParamKind::String, true, "Campo numérico sobre el que operar"),
        ],
    },
    CapabilityDescriptor {
        name: "web_search",
        description: "Busca información en internet (proveedores, tipos de cambio, contexto).",
        parameters: &[
            param("query", ParamKind::String, true, "Términos de búsqueda"),
            param("max_results", ParamKind::Integer, false, "Máximo de resultados (1-10, default 5)"),
        ],
    },
    CapabilityDescriptor {
        name: "search_exchange_rate",
        description: "Busca el tipo de cambio entre dos monedas, actual o en una fecha.",
        parameters: &[
            param("currency_from", ParamKind::String, true, "Moneda origen, ej. \"USD\""),
            param("currency_to", ParamKind::String, true, "Moneda destino, ej. \"EUR\""),
            param("date", ParamKind::String, false, "Fecha YYYY-MM-DD (default hoy)"),
        ],
    },
    CapabilityDescriptor {
        name: "verify_company_info",
        description: "Verifica información de una empresa en internet (NIF/VAT, web).",
        parameters: &[
            param("company_name", ParamKind::String, true, "Nombre de la empresa"),
            param("country", ParamKind::String, false, "País para refinar la búsqueda"),
        ],
    },
    CapabilityDescriptor {
        name: "execute_sql_safe",
        description: "Consulta SQL de solo lectura sobre las tablas permitidas. Actualmente \
                      deshabilitada: usa get_facturas / get_ventas / get_dashboard.",
        parameters: &[param("query", ParamKind::String, true, "Consulta SELECT")],
    },
    CapabilityDescriptor {
        name: "list_available_tables",
        description: "Lista las tablas de datos disponibles para consulta.",
        parameters: &[],
    },
    CapabilityDescriptor {
        name: "get_table_schema",
        description: "Obtiene las columnas de una tabla concreta.",
        parameters: &[param("table_name", ParamKind::String, true, "Nombre de la tabla")],
    },
];

pub fn catalog() -> &'static [CapabilityDescriptor] {
    CATALOG
}

pub fn find(name: &str) -> Option<&'static CapabilityDescriptor> {
    CATALOG.iter().find(|descriptor| descriptor.name == name)
}
