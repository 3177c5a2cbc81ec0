/// Control page. Polls `/tempC` and `/tempF` every 10 s.
pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Motor Control</title>
  <style>
    body{font-family:Arial,sans-serif;text-align:center;margin-top:3rem;color:#222}
    h1{color:#333}
    .reading{font-size:1.3rem;margin:.4rem 0}
    button{margin:.6rem;padding:.6rem 1.4rem;font-size:1.1rem;border-radius:6px;border:1px solid #888}
    #on{background:#d8f5d8}#off{background:#f5d8d8}
  </style>
</head>
<body>
  <h1>Motor Control</h1>
  <p class="reading">Temperature (&deg;C): <span id="tempC">--</span></p>
  <p class="reading">Temperature (&deg;F): <span id="tempF">--</span></p>
  <button id="on">ON</button>
  <button id="off">OFF</button>

  <script>
    const q=(id)=>document.getElementById(id);

    function sendCommand(cmd){
      fetch('/motor',{method:'POST',headers:{'content-type':'application/x-www-form-urlencoded'},body:'state='+cmd})
        .catch(()=>{});
    }

    function updateTemp(){
      ['tempC','tempF'].forEach((unit)=>{
        fetch('/'+unit)
          .then((r)=>r.text())
          .then((text)=>{q(unit).textContent=text;})
          .catch(()=>{});
      });
    }

    q('on').addEventListener('click',()=>sendCommand('ON'));
    q('off').addEventListener('click',()=>sendCommand('OFF'));
    updateTemp();
    setInterval(updateTemp,10000);
  </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_polls_both_units_and_posts_commands() {
        assert!(INDEX_HTML.contains("'tempC','tempF'"));
        assert!(INDEX_HTML.contains("setInterval(updateTemp,10000)"));
        assert!(INDEX_HTML.contains("fetch('/motor'"));
        assert!(INDEX_HTML.contains("'state='+cmd"));
    }
}
